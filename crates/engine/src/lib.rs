pub mod attribute;
mod bubbling;
pub mod collection;
pub mod entity;
pub mod error;
pub mod event;
mod merge;
pub mod options;
pub mod schema;
mod serialize;
pub mod undo;

pub use attribute::{Attribute, Attributes};
pub use collection::{Collection, Element};
pub use entity::Entity;
pub use error::EngineError;
pub use event::{CollectionEvent, EntityEvent};
pub use options::{JsonOptions, SetOptions};
pub use schema::{
    Cardinality, ContainerType, DEFAULT_CONTAINER_TYPE, DEFAULT_DESTROY_MARKER,
    DEFAULT_ID_ATTRIBUTE, DELETED_PREFIX, EntityType, EntityTypeBuilder, GENERIC_TYPE,
    NESTED_SUFFIX, Relation, RelationDescriptor, Schema, SchemaBuilder,
};
pub use undo::UndoStatus;

pub use nestattr_core::{ClientId, ListenerId, Value};
