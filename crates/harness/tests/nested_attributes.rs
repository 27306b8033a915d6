use std::collections::BTreeMap;

use nestattr_engine::{
    Attribute, Attributes, Collection, ContainerType, EngineError, EntityEvent, EntityTypeBuilder,
    JsonOptions, RelationDescriptor, Schema, SetOptions, Value,
};
use nestattr_harness::{
    EventRecorder, FakeTransport, deep_schema, has_many_schema, has_one_schema, plain,
};
use nestattr_store::StoreError;
use serde_json::json;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn attributes(pairs: Vec<(&str, Attribute)>) -> Attributes {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect::<BTreeMap<_, _>>()
}

// ============================================================================
// Has-one: assignment
// ============================================================================

#[test]
fn has_one_is_not_initialized_without_a_value() -> TestResult {
    let post = has_one_schema(false)?.create("Post", Value::Null)?;
    assert!(post.get("author").is_none());
    Ok(())
}

#[test]
fn has_one_builds_the_related_entity_from_plain_attributes() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;

    assert_eq!(post.get_value("title"), Some(Value::from("Some Title")));
    let author = post.get_entity("author").ok_or("author not built")?;
    assert_eq!(author.entity_type().name(), "Person");
    assert_eq!(author.get_value("name"), Some(Value::from("Jon Snow")));
    Ok(())
}

#[test]
fn has_one_keeps_a_given_entity_as_is() -> TestResult {
    let schema = has_one_schema(false)?;
    let author = schema.create("Person", plain(json!({ "name": "Jon Snow" })))?;

    let post = schema.entity_type("Post")?.create(attributes(vec![
        ("title", "Some Title".into()),
        ("author", author.clone().into()),
    ]))?;
    assert!(post.get_entity("author").is_some_and(|a| a.ptr_eq(&author)));

    let other = schema.create("Person", plain(json!({ "name": "Robb Stark" })))?;
    post.set_key("author", other.clone(), &SetOptions::default())?;
    assert!(post.get_entity("author").is_some_and(|a| a.ptr_eq(&other)));
    Ok(())
}

#[test]
fn has_one_rebuilds_an_entity_of_another_type() -> TestResult {
    let schema = has_many_schema(false)?;
    let comment = schema.create("Comment", plain(json!({ "name": "Jon Snow" })))?;
    let people = has_one_schema(false)?;

    let post = people.create("Post", Value::Null)?;
    post.set_key("author", comment.clone(), &SetOptions::default())?;

    let author = post.get_entity("author").ok_or("author not built")?;
    assert!(!author.ptr_eq(&comment));
    assert_eq!(author.entity_type().name(), "Person");
    assert_eq!(author.get_value("name"), Some(Value::from("Jon Snow")));
    Ok(())
}

#[test]
fn has_one_rejects_scalar_values() -> TestResult {
    let post = has_one_schema(false)?.create("Post", Value::Null)?;
    let result = post.set_value(plain(json!({ "author": 5 })), &SetOptions::default());
    assert!(matches!(
        result,
        Err(EngineError::InvalidRelationValue { ref key, found: "integer" }) if key == "author"
    ));
    assert!(post.get("author").is_none());
    Ok(())
}

#[test]
fn set_options_reach_the_attribute_store() -> TestResult {
    let post = has_one_schema(false)?.create("Post", Value::Null)?;
    let recorder = EventRecorder::attach(&post);

    post.set_value(
        plain(json!({ "title": "quiet", "author": { "name": "Jon Snow" } })),
        &SetOptions::silent(),
    )?;
    assert!(recorder.events().is_empty());
    assert!(post.get_entity("author").is_some());

    post.set_key("title", "loud", &SetOptions::default())?;
    assert_eq!(recorder.changed_count(), 1);
    assert_eq!(
        recorder.count(|e| matches!(e, EntityEvent::AttributeChanged { key } if key == "title")),
        1
    );
    Ok(())
}

#[test]
fn null_assignment_is_a_no_op_and_non_maps_are_rejected() -> TestResult {
    let post = has_one_schema(false)?.create("Post", plain(json!({ "title": "t" })))?;
    let recorder = EventRecorder::attach(&post);

    post.set_value(Value::Null, &SetOptions::default())?;
    assert!(recorder.events().is_empty());

    let result = post.set_value(Value::from("text"), &SetOptions::default());
    assert!(matches!(result, Err(EngineError::InvalidAttributes(_))));
    assert_eq!(post.get_value("title"), Some(Value::from("t")));
    Ok(())
}

#[test]
fn has_one_clone_shares_nothing() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;
    let copy = post.deep_clone()?;

    assert!(!copy.ptr_eq(&post));
    assert_eq!(copy.to_plain(&JsonOptions::default()), post.to_plain(&JsonOptions::default()));

    let author = post.get_entity("author").ok_or("author missing")?;
    let copied = copy.get_entity("author").ok_or("copied author missing")?;
    assert!(!copied.ptr_eq(&author));

    copied.set_key("name", "Robb Stark", &SetOptions::default())?;
    assert_eq!(author.get_value("name"), Some(Value::from("Jon Snow")));
    Ok(())
}

// ============================================================================
// Has-one: bubbling
// ============================================================================

#[test]
fn has_one_change_bubbles_with_the_changed_entity() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;
    let author = post.get_entity("author").ok_or("author missing")?;
    let recorder = EventRecorder::attach(&post);

    author.set_key("name", "Robb Stark", &SetOptions::default())?;

    assert_eq!(recorder.nested_origins(), vec![author.clone()]);
    assert_eq!(recorder.relation_origins("author"), vec![author]);
    // Nested changes are not own changes
    assert_eq!(recorder.changed_count(), 0);
    Ok(())
}

#[test]
fn has_one_bubbles_once_after_reassignment() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;
    let replaced = post.get_entity("author").ok_or("author missing")?;
    post.set_value(
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
        &SetOptions::default(),
    )?;
    let author = post.get_entity("author").ok_or("author missing")?;
    assert!(!author.ptr_eq(&replaced));
    assert_eq!(post.bubbling_link_count(), 1);

    let recorder = EventRecorder::attach(&post);
    author.set_key("name", "Robb Stark", &SetOptions::default())?;
    replaced.set_key("name", "Nobody", &SetOptions::default())?;

    assert_eq!(recorder.nested_origins(), vec![author.clone()]);
    assert_eq!(recorder.relation_origins("author"), vec![author]);
    Ok(())
}

#[test]
fn triggered_nested_change_on_child_reaches_parent() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "author": { "name": "Jon Snow" } })),
    )?;
    let author = post.get_entity("author").ok_or("author missing")?;
    let recorder = EventRecorder::attach(&post);

    author.trigger(EntityEvent::NestedChanged {
        origin: author.clone(),
    });
    assert_eq!(recorder.nested_origins(), vec![author]);
    Ok(())
}

#[test]
fn clearing_stops_has_one_bubbling() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;
    let author = post.get_entity("author").ok_or("author missing")?;

    post.clear(&SetOptions::default());
    let recorder = EventRecorder::attach(&post);
    author.set_key("name", "Robb Stark", &SetOptions::default())?;

    assert!(recorder.nested_origins().is_empty());
    assert!(recorder.relation_origins("author").is_empty());
    assert_eq!(post.bubbling_link_count(), 0);
    Ok(())
}

#[test]
fn unsetting_a_relation_releases_it() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "author": { "name": "Jon Snow" } })),
    )?;
    let author = post.get_entity("author").ok_or("author missing")?;

    assert!(post.unset("author", &SetOptions::default()));
    assert!(!post.unset("author", &SetOptions::default()));
    assert_eq!(post.bubbling_link_count(), 0);

    let recorder = EventRecorder::attach(&post);
    author.set_key("name", "Robb Stark", &SetOptions::default())?;
    assert!(recorder.nested_origins().is_empty());
    Ok(())
}

// ============================================================================
// Has-one: serialization and sync
// ============================================================================

#[test]
fn has_one_serializes_under_key_or_attributes_suffix() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;

    assert_eq!(
        post.to_plain(&JsonOptions::default()),
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } }))
    );
    assert_eq!(
        post.to_plain(&JsonOptions::nested()),
        plain(json!({ "title": "Some Title", "author_attributes": { "name": "Jon Snow" } }))
    );
    Ok(())
}

#[test]
fn has_one_ignores_serialize_keys() -> TestResult {
    let schema = Schema::builder()
        .entity(
            EntityTypeBuilder::new("Post").relation(
                RelationDescriptor::one("author", "Person").serialize_keys(["name"]),
            ),
        )
        .entity(EntityTypeBuilder::new("Person"))
        .build()?;
    let post = schema.create(
        "Post",
        plain(json!({ "author": { "name": "Jon Snow", "email": "jon@wall" } })),
    )?;

    assert_eq!(
        post.to_plain(&JsonOptions::default()),
        plain(json!({ "author": { "name": "Jon Snow", "email": "jon@wall" } }))
    );
    assert_eq!(
        post.to_plain(&JsonOptions::nested()),
        plain(json!({ "author_attributes": { "name": "Jon Snow", "email": "jon@wall" } }))
    );
    Ok(())
}

#[test]
fn syncing_with_unrelated_response_keys_succeeds() -> TestResult {
    let post = has_one_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "author": { "name": "Jon Snow" } })),
    )?;
    let mut transport = FakeTransport::new();
    transport.stub_response(plain(json!({ "title": "Some Title", "comments": [] })));

    transport.save(&post)?;

    assert_eq!(transport.request_count(), 1);
    assert_eq!(
        transport.last_request()?,
        Some(plain(json!({ "title": "Some Title", "author_attributes": { "name": "Jon Snow" } })))
    );
    assert_eq!(post.get_value("comments"), Some(plain(json!([]))));
    Ok(())
}

// ============================================================================
// Has-many: assignment
// ============================================================================

#[test]
fn has_many_starts_with_an_empty_collection() -> TestResult {
    let post = has_many_schema(false)?.create("Post", Value::Null)?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    assert!(comments.is_empty());
    assert_eq!(comments.model_type().name(), "Comment");
    assert!(comments.tombstones().is_some_and(|t| t.is_empty()));
    Ok(())
}

#[test]
fn has_many_builds_members_from_plain_list() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "comments": [{ "body": "some comment" }] })),
    )?;

    assert_eq!(post.get_value("title"), Some(Value::from("Some Title")));
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    assert_eq!(comments.len(), 1);
    let comment = comments.at(0).ok_or("comment missing")?;
    assert_eq!(comment.entity_type().name(), "Comment");
    assert_eq!(comment.get_value("body"), Some(Value::from("some comment")));
    Ok(())
}

#[test]
fn given_collection_is_copied_not_stored() -> TestResult {
    let schema = has_many_schema(false)?;
    let source = schema.create("Post", plain(json!({ "comments": [{ "body": "a" }, { "body": "b" }] })))?;
    let given = source.get_collection("comments").ok_or("collection missing")?;

    let post = schema
        .entity_type("Post")?
        .create(attributes(vec![("comments", given.clone().into())]))?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;

    assert!(!comments.ptr_eq(&given));
    assert_eq!(comments.len(), 2);
    assert!(comments.at(0).zip(given.at(0)).is_some_and(|(a, b)| a.ptr_eq(&b)));

    // Updating also copies into the existing collection
    let other = Collection::new(schema.entity_type("Comment")?);
    other.add(plain(json!({ "body": "c" })))?;
    post.set_key("comments", other.clone(), &SetOptions::default())?;
    assert!(post.get_collection("comments").is_some_and(|c| c.ptr_eq(&comments)));
    assert_eq!(comments.len(), 1);
    assert_eq!(comments.at(0).and_then(|c| c.get_value("body")), Some(Value::from("c")));
    Ok(())
}

#[test]
fn destroy_marked_member_is_tombstoned_on_creation() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "body": "x" }, { "id": 5, "body": "y", "_destroy": true }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let tombstones = comments.tombstones().ok_or("tombstones missing")?;

    assert_eq!(comments.len(), 1);
    assert_eq!(comments.at(0).and_then(|c| c.get_value("body")), Some(Value::from("x")));
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones.at(0).and_then(|c| c.id()), Some(Value::from(5)));
    Ok(())
}

#[test]
fn deleted_key_feeds_tombstones_and_is_not_stored() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({
            "comments": [],
            "deleted_comments": [{ "id": 123, "body": "gone", "_destroy": true }]
        })),
    )?;
    assert!(!post.has("deleted_comments"));
    let tombstones = post
        .get_collection("comments")
        .and_then(|c| c.tombstones())
        .ok_or("tombstones missing")?;
    assert_eq!(tombstones.len(), 1);

    post.set_value(
        plain(json!({ "deleted_comments": [{ "id": 124, "body": "also gone", "_destroy": true }] })),
        &SetOptions::default(),
    )?;
    assert!(!post.has("deleted_comments"));
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones.at(0).and_then(|c| c.id()), Some(Value::from(124)));
    Ok(())
}

#[test]
fn updating_merges_into_the_same_collection() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "id": 1, "body": "first" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let first = comments.at(0).ok_or("comment missing")?;

    post.set_value(
        plain(json!({ "comments": [{ "id": 1, "body": "edited" }, { "body": "second" }] })),
        &SetOptions::default(),
    )?;
    assert!(post.get_collection("comments").is_some_and(|c| c.ptr_eq(&comments)));
    assert_eq!(comments.len(), 2);
    assert!(comments.at(0).is_some_and(|c| c.ptr_eq(&first)));
    assert_eq!(first.get_value("body"), Some(Value::from("edited")));

    post.set_key("comments", plain(json!([{ "id": 1, "body": "by key" }])), &SetOptions::default())?;
    assert_eq!(comments.len(), 1);
    assert_eq!(first.get_value("body"), Some(Value::from("by key")));

    post.set_key("title", "untouched nested", &SetOptions::default())?;
    assert_eq!(comments.len(), 1);
    assert!(comments.at(0).is_some_and(|c| c.ptr_eq(&first)));
    Ok(())
}

#[test]
fn has_many_clone_does_not_share_collections() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "t", "comments": [{ "id": 1, "body": "a" }] })),
    )?;
    let copy = post.deep_clone()?;
    let original = post.get_collection("comments").ok_or("collection missing")?;
    let copied = copy.get_collection("comments").ok_or("collection missing")?;

    assert!(!copied.ptr_eq(&original));
    assert!(!copied.at(0).zip(original.at(0)).is_some_and(|(a, b)| a.ptr_eq(&b)));
    assert_eq!(copy.to_plain(&JsonOptions::default()), post.to_plain(&JsonOptions::default()));
    Ok(())
}

#[test]
fn custom_container_type_is_used() -> TestResult {
    let schema = Schema::builder()
        .entity(EntityTypeBuilder::new("Post").relation(
            RelationDescriptor::many("comments")
                .container_type(ContainerType::new("CommentThread").model("Comment")),
        ))
        .entity(EntityTypeBuilder::new("Comment"))
        .build()?;
    let post = schema.create("Post", plain(json!({ "comments": [{ "body": "a" }] })))?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;

    assert_eq!(comments.type_name(), "CommentThread");
    assert_eq!(comments.model_type().name(), "Comment");
    assert_eq!(comments.at(0).map(|c| c.entity_type().name().to_string()), Some("Comment".to_string()));
    Ok(())
}

#[test]
fn custom_destroy_marker_drives_soft_delete() -> TestResult {
    let schema = Schema::builder()
        .entity(EntityTypeBuilder::new("Post").relation(
            RelationDescriptor::many("comments")
                .related_type("Comment")
                .destroy_marker("_remove"),
        ))
        .entity(EntityTypeBuilder::new("Comment"))
        .build()?;
    let post = schema.create(
        "Post",
        plain(json!({ "comments": [{ "id": 1, "_remove": true }, { "id": 2, "_destroy": true }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;

    assert_eq!(comments.destroy_marker(), Some("_remove"));
    assert_eq!(comments.len(), 1);
    assert_eq!(comments.at(0).and_then(|c| c.id()), Some(Value::from(2)));
    Ok(())
}

#[test]
fn relation_errors_propagate_from_nested_levels() -> TestResult {
    let post = has_many_schema(false)?.create("Post", Value::Null)?;
    let result = post.set_value(plain(json!({ "comments": "nope" })), &SetOptions::default());
    assert!(matches!(result, Err(EngineError::InvalidRelationValue { .. })));

    let result = post.set_value(plain(json!({ "comments": [1, 2] })), &SetOptions::default());
    assert!(matches!(result, Err(EngineError::InvalidAttributes(_))));
    Ok(())
}

#[test]
fn validator_rejects_before_commit() -> TestResult {
    fn titled(attributes: &Attributes) -> Result<(), String> {
        match attributes.get("title").and_then(Attribute::as_value) {
            Some(title) if title.is_truthy() => Ok(()),
            _ => Err("title is required".to_string()),
        }
    }

    let schema = Schema::builder()
        .entity(EntityTypeBuilder::new("Post").validator(titled))
        .build()?;
    let post = schema.create("Post", plain(json!({ "title": "t" })))?;

    let result = post.set_key("title", "", &SetOptions::validated());
    assert!(matches!(result, Err(EngineError::Store(StoreError::Validation(_)))));
    assert_eq!(post.get_value("title"), Some(Value::from("t")));

    // Not consulted unless requested
    post.set_key("title", "", &SetOptions::default())?;
    assert_eq!(post.get_value("title"), Some(Value::from("")));
    Ok(())
}

#[test]
fn rejected_assignment_leaves_new_author_unwired() -> TestResult {
    fn titled(attributes: &Attributes) -> Result<(), String> {
        match attributes.get("title").and_then(Attribute::as_value) {
            Some(title) if title.is_truthy() => Ok(()),
            _ => Err("title is required".to_string()),
        }
    }

    let schema = Schema::builder()
        .entity(EntityTypeBuilder::new("Post").validator(titled).has_one("author", "Person"))
        .entity(EntityTypeBuilder::new("Person"))
        .build()?;
    let original = schema.create("Person", plain(json!({ "name": "Jon Snow" })))?;
    let post = schema.entity_type("Post")?.create(attributes(vec![
        ("title", "t".into()),
        ("author", original.clone().into()),
    ]))?;
    let replacement = schema.create("Person", plain(json!({ "name": "Robb Stark" })))?;

    for _ in 0..2 {
        let result = post.set(
            attributes(vec![("title", "".into()), ("author", replacement.clone().into())]),
            &SetOptions::validated(),
        );
        assert!(matches!(result, Err(EngineError::Store(StoreError::Validation(_)))));
    }
    assert!(post.get_entity("author").is_some_and(|a| a.ptr_eq(&original)));
    assert_eq!(post.bubbling_link_count(), 1);

    let recorder = EventRecorder::attach(&post);
    replacement.set_key("name", "Arya Stark", &SetOptions::default())?;
    assert!(recorder.relation_origins("author").is_empty());

    original.set_key("name", "Aegon", &SetOptions::default())?;
    assert_eq!(recorder.relation_origins("author").len(), 1);
    Ok(())
}

#[test]
fn failing_later_relation_releases_earlier_ones() -> TestResult {
    let post = deep_schema(false)?.create("Post", plain(json!({ "title": "t" })))?;
    assert_eq!(post.bubbling_link_count(), 1);

    for _ in 0..2 {
        let result = post.set_value(
            plain(json!({ "author": { "name": "Jon Snow" }, "comments": 5 })),
            &SetOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidRelationValue { .. })));
    }

    assert!(post.get("author").is_none());
    assert_eq!(post.bubbling_link_count(), 1);
    Ok(())
}

// ============================================================================
// Has-many: bubbling
// ============================================================================

#[test]
fn member_change_bubbles_with_the_changed_member() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "body": "some comment" }] })),
    )?;
    let comment = post
        .get_collection("comments")
        .and_then(|c| c.at(0))
        .ok_or("comment missing")?;
    let recorder = EventRecorder::attach(&post);

    comment.set_key("body", "some new body", &SetOptions::default())?;

    assert_eq!(recorder.nested_origins(), vec![comment.clone()]);
    assert_eq!(recorder.relation_origins("comments"), vec![comment]);
    Ok(())
}

#[test]
fn member_change_bubbles_once_after_reassignment() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "body": "some comment" }] })),
    )?;
    post.set_value(plain(json!({ "comments": [{ "body": "some comment" }] })), &SetOptions::default())?;
    let comment = post
        .get_collection("comments")
        .and_then(|c| c.at(0))
        .ok_or("comment missing")?;
    let recorder = EventRecorder::attach(&post);

    comment.set_key("body", "some new body", &SetOptions::default())?;

    assert_eq!(recorder.nested_origins().len(), 1);
    assert_eq!(recorder.relation_origins("comments").len(), 1);
    Ok(())
}

#[test]
fn adding_and_removing_members_bubble() -> TestResult {
    let post = has_many_schema(false)?.create("Post", Value::Null)?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let recorder = EventRecorder::attach(&post);

    let added = comments.add(plain(json!({ "body": "new" })))?;
    assert_eq!(recorder.nested_origins(), vec![added.clone()]);
    assert_eq!(recorder.relation_origins("comments"), vec![added.clone()]);

    recorder.clear();
    comments.remove(&added)?;
    assert_eq!(recorder.nested_origins(), vec![added.clone()]);
    assert_eq!(recorder.relation_origins("comments"), vec![added]);
    Ok(())
}

#[test]
fn nested_change_on_member_reaches_parent() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "body": "some comment" }] })),
    )?;
    let comment = post
        .get_collection("comments")
        .and_then(|c| c.at(0))
        .ok_or("comment missing")?;
    let recorder = EventRecorder::attach(&post);

    comment.trigger(EntityEvent::NestedChanged {
        origin: comment.clone(),
    });
    assert_eq!(recorder.nested_origins(), vec![comment]);
    Ok(())
}

#[test]
fn deep_changes_report_the_deepest_origin() -> TestResult {
    let post = deep_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "id": 1, "tags": [{ "id": 2, "name": "rust" }] }] })),
    )?;
    let comment = post
        .get_collection("comments")
        .and_then(|c| c.at(0))
        .ok_or("comment missing")?;
    let tag = comment
        .get_collection("tags")
        .and_then(|t| t.at(0))
        .ok_or("tag missing")?;
    let post_events = EventRecorder::attach(&post);
    let comment_events = EventRecorder::attach(&comment);

    tag.set_key("name", "ruby", &SetOptions::default())?;

    assert_eq!(comment_events.nested_origins(), vec![tag.clone()]);
    assert_eq!(comment_events.relation_origins("tags"), vec![tag.clone()]);
    assert_eq!(post_events.nested_origins(), vec![tag.clone()]);
    assert_eq!(post_events.relation_origins("comments"), vec![tag]);
    Ok(())
}

#[test]
fn clearing_stops_collection_bubbling() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "body": "some comment" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let comment = comments.at(0).ok_or("comment missing")?;

    post.clear(&SetOptions::default());
    let recorder = EventRecorder::attach(&post);
    comment.set_key("body", "some new body", &SetOptions::default())?;

    assert!(recorder.nested_origins().is_empty());
    assert!(recorder.relation_origins("comments").is_empty());
    assert_eq!(comments.listener_count(), 0);
    Ok(())
}

// ============================================================================
// Has-many: serialization
// ============================================================================

#[test]
fn has_many_serializes_members() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "comments": [{ "body": "some comment" }] })),
    )?;

    assert_eq!(
        post.to_plain(&JsonOptions::default()),
        plain(json!({ "title": "Some Title", "comments": [{ "body": "some comment" }] }))
    );
    assert_eq!(
        post.to_plain(&JsonOptions::nested()),
        plain(json!({ "title": "Some Title", "comments_attributes": [{ "body": "some comment" }] }))
    );
    Ok(())
}

#[test]
fn removed_unsaved_member_is_not_serialized() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "comments": [{ "body": "some comment" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let comment = comments.at(0).ok_or("comment missing")?;

    comments.remove(&comment)?;
    assert_eq!(
        post.to_plain(&JsonOptions::nested()),
        plain(json!({ "title": "Some Title", "comments_attributes": [] }))
    );
    Ok(())
}

#[test]
fn removed_saved_member_is_serialized_with_destroy_marker() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "comments": [{ "body": "some comment" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let comment = comments.at(0).ok_or("comment missing")?;
    comment.set_key("id", "123", &SetOptions::default())?;

    comments.remove(&comment)?;
    assert_eq!(
        post.to_plain(&JsonOptions::nested()),
        plain(json!({
            "title": "Some Title",
            "comments_attributes": [{ "id": "123", "body": "some comment", "_destroy": true }]
        }))
    );
    Ok(())
}

#[test]
fn tombstones_are_dropped_after_sync() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "comments": [{ "id": "123", "body": "some comment" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let comment = comments.at(0).ok_or("comment missing")?;
    comments.remove(&comment)?;

    let mut transport = FakeTransport::new();
    transport.stub_response(plain(json!({ "title": "Some Title", "comments": [] })));
    transport.save(&post)?;

    // The write carried the tombstone
    assert_eq!(
        transport.last_request()?,
        Some(plain(json!({
            "title": "Some Title",
            "comments_attributes": [{ "id": "123", "body": "some comment", "_destroy": true }]
        })))
    );
    assert_eq!(
        post.to_plain(&JsonOptions::nested()),
        plain(json!({ "title": "Some Title", "comments_attributes": [] }))
    );
    Ok(())
}

#[test]
fn sync_clears_tombstones_at_every_depth() -> TestResult {
    let post = deep_schema(false)?.create(
        "Post",
        plain(json!({ "comments": [{ "id": 1, "tags": [{ "id": 2, "name": "rust" }] }] })),
    )?;
    let comment = post
        .get_collection("comments")
        .and_then(|c| c.at(0))
        .ok_or("comment missing")?;
    let tags = comment.get_collection("tags").ok_or("tags missing")?;
    let tag = tags.at(0).ok_or("tag missing")?;
    tags.remove(&tag)?;
    assert!(tags.tombstones().is_some_and(|t| t.len() == 1));

    post.mark_synced();
    assert!(tags.tombstones().is_some_and(|t| t.is_empty()));
    Ok(())
}

#[test]
fn tombstones_are_dropped_after_clear() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "title": "Some Title", "comments": [{ "id": "123", "body": "some comment" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let comment = comments.at(0).ok_or("comment missing")?;
    comments.remove(&comment)?;

    post.clear(&SetOptions::default());
    assert_eq!(post.to_plain(&JsonOptions::nested()), Value::map());
    assert!(comments.tombstones().is_some_and(|t| t.is_empty()));
    Ok(())
}

#[test]
fn with_deleted_adds_deleted_key() -> TestResult {
    let post = has_many_schema(false)?.create(
        "Post",
        plain(json!({ "id": 321, "title": "Some Title", "comments": [{ "id": 123, "body": "some comment" }] })),
    )?;
    let comments = post.get_collection("comments").ok_or("collection missing")?;
    let comment = comments.at(0).ok_or("comment missing")?;
    comments.remove(&comment)?;

    assert_eq!(
        post.to_plain(&JsonOptions::with_deleted()),
        plain(json!({
            "id": 321,
            "title": "Some Title",
            "comments": [],
            "deleted_comments": [{ "id": 123, "body": "some comment", "_destroy": true }]
        }))
    );
    assert_eq!(
        post.to_plain(&JsonOptions { with_deleted: true, nested: true }),
        plain(json!({
            "id": 321,
            "title": "Some Title",
            "comments_attributes": [{ "id": 123, "body": "some comment", "_destroy": true }],
            "deleted_comments": [{ "id": 123, "body": "some comment", "_destroy": true }]
        }))
    );
    Ok(())
}

#[test]
fn destroy_only_syncs_persisted_entities() -> TestResult {
    let post = has_many_schema(false)?.create("Post", plain(json!({ "title": "t" })))?;
    let recorder = EventRecorder::attach(&post);
    let mut transport = FakeTransport::new();

    transport.destroy(&post)?;
    assert_eq!(transport.request_count(), 0);
    assert_eq!(recorder.count(|e| matches!(e, EntityEvent::Synced)), 0);

    post.set_key("id", 9, &SetOptions::default())?;
    transport.destroy(&post)?;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.last_request()?, Some(Value::from(9)));
    assert_eq!(recorder.count(|e| matches!(e, EntityEvent::Synced)), 1);
    Ok(())
}
