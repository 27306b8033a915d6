use nestattr_core::CoreError;
use nestattr_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("unknown entity type: {0}")]
    UnknownType(String),

    #[error("entity type declared twice: {0}")]
    DuplicateType(String),

    #[error("relation key `{key}` declared twice on {entity_type}")]
    DuplicateRelation { entity_type: String, key: String },

    #[error("relation `{key}` on {entity_type} refers to unknown type {related}")]
    UnresolvedRelation {
        entity_type: String,
        key: String,
        related: String,
    },

    #[error("relation `{key}` cannot be assigned a {found} value")]
    InvalidRelationValue { key: String, found: &'static str },

    #[error("invalid attributes: {0}")]
    InvalidAttributes(String),
}
