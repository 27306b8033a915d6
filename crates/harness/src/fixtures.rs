use nestattr_core::Value;
use nestattr_engine::{EngineError, EntityTypeBuilder, Schema};

/// Plain value from a `serde_json::json!` literal.
pub fn plain(json: serde_json::Value) -> Value {
    Value::from(json)
}

fn entity_type(name: &str, undoable: bool) -> EntityTypeBuilder {
    let builder = EntityTypeBuilder::new(name);
    if undoable { builder.undoable() } else { builder }
}

/// `Post` has one `author` of type `Person`.
pub fn has_one_schema(undoable: bool) -> Result<Schema, EngineError> {
    Schema::builder()
        .entity(entity_type("Post", undoable).has_one("author", "Person"))
        .entity(entity_type("Person", undoable))
        .build()
}

/// `Post` has many `comments` of type `Comment`.
pub fn has_many_schema(undoable: bool) -> Result<Schema, EngineError> {
    Schema::builder()
        .entity(entity_type("Post", undoable).has_many("comments", "Comment"))
        .entity(entity_type("Comment", undoable))
        .build()
}

/// `Post` has many `comments`, each `Comment` has many `tags`, and the post
/// has one `author`.
pub fn deep_schema(undoable: bool) -> Result<Schema, EngineError> {
    Schema::builder()
        .entity(
            entity_type("Post", undoable)
                .has_one("author", "Person")
                .has_many("comments", "Comment"),
        )
        .entity(entity_type("Comment", undoable).has_many("tags", "Tag"))
        .entity(entity_type("Tag", undoable))
        .entity(entity_type("Person", undoable))
        .build()
}
