pub mod attributes;
pub mod error;
pub mod events;

pub use attributes::{AttributeStore, Change, Validator};
pub use error::StoreError;
pub use events::Emitter;
