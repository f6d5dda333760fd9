//! Core runtime for Remodel: presentation models, the indexed model store,
//! typed bean facades, the command protocol, reference-graph garbage
//! collection, and the ergonomics exported via the `prelude`.
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod beans;
pub mod command;
pub mod context;
pub mod controller;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod gc;
pub mod model;
pub mod obs;
pub mod schema;
pub mod types;
pub mod value;

pub use error::InternalError;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No repositories, codecs, or internals are re-exported here.
///

pub mod prelude {
    pub use crate::{
        beans::{Bean, BeanBinder, BeanList, BeanRef, ObservableList, Property, RemotingBean},
        context::{ContextConfig, RemotingContext},
        controller::{ActionCall, ControllerSpec},
        error::InternalError,
        schema::ClassDescriptor,
        types::{ModelId, SystemId},
        value::WireValue,
    };
}
