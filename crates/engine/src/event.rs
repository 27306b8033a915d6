use crate::entity::Entity;

/// Notifications emitted by an entity.
#[derive(Debug, Clone)]
pub enum EntityEvent {
    /// One of the entity's own attributes changed.
    AttributeChanged { key: String },
    /// Emitted once after every assignment that changed something.
    Changed,
    /// Something below a relation changed. `origin` is the deepest entity involved.
    NestedChanged { origin: Entity },
    /// Same as `NestedChanged`, scoped to the relation it arrived through.
    RelationChanged { key: String, origin: Entity },
    /// A persistence round-trip for this entity succeeded.
    Synced,
    /// An undo save-point was taken.
    StateStored,
    /// The entity was restored to its last save-point.
    StateRestored,
}

/// Notifications emitted by a collection.
#[derive(Debug, Clone)]
pub enum CollectionEvent {
    Add { entity: Entity },
    Remove { entity: Entity },
    /// A member emitted `EntityEvent::Changed`.
    Changed { entity: Entity },
    /// A member emitted `EntityEvent::NestedChanged`.
    NestedChanged { origin: Entity },
    Reset,
}
