//! ## Crate layout
//! - `core`: model store, bean facades, command protocol, dispatcher,
//!   reference-graph garbage collection, and observability.
//!
//! The `prelude` module mirrors the surface application code uses when
//! declaring bean classes and driving a remoting context.

pub use remodel_core as core;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use remodel_core::{InternalError, context::RemotingContext};

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::{
        beans::{
            Bean, BeanBinder, BeanEvent, BeanList, BeanRef, ObservableList, Property,
            RemotingBean,
        },
        context::{ContextConfig, Reaction, RemotingContext},
        controller::{ActionCall, ControllerSpec},
        error::InternalError,
        model::store::ValueChange,
        schema::ClassDescriptor,
        types::{BeanHandle, ModelId, SystemId},
        value::WireValue,
    };
}
