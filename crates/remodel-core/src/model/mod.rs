pub mod attribute;
pub mod presentation;
pub mod store;

pub use attribute::Attribute;
pub use presentation::{PresentationModel, PresentationModelBuilder};
pub use store::{EventKind, ModelStore, ModelStoreEvent, Subscription, ValueChange};
