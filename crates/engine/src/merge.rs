use nestattr_core::Value;
use tracing::debug;

use crate::attribute::{Attribute, Attributes};
use crate::bubbling::{BubbleTarget, attach_bubbling};
use crate::collection::{Collection, Element};
use crate::entity::Entity;
use crate::error::EngineError;
use crate::event::EntityEvent;
use crate::options::JsonOptions;
use crate::schema::{Cardinality, EntityType, Relation};

/// Replace raw relation values in `attributes` with live entities and
/// collections, in relation declaration order.
pub(crate) fn resolve_relations(
    entity: &Entity,
    mut attributes: Attributes,
) -> Result<Attributes, EngineError> {
    let ty = entity.entity_type().clone();
    for relation in ty.relations() {
        match relation.cardinality() {
            Cardinality::One => resolve_one(entity, &ty, relation, &mut attributes)?,
            Cardinality::Many => resolve_many(entity, &ty, relation, &mut attributes)?,
        }
    }
    install_sync_hook(entity);
    Ok(attributes)
}

fn resolve_one(
    entity: &Entity,
    ty: &EntityType,
    relation: &Relation,
    attributes: &mut Attributes,
) -> Result<(), EngineError> {
    let key = relation.key();
    let Some(value) = attributes.remove(key) else {
        return Ok(());
    };
    if !value.is_truthy() {
        attributes.insert(key.to_string(), value);
        return Ok(());
    }

    let related = ty.related_type(relation);
    let child = match value {
        Attribute::Entity(child) if *child.entity_type() == related => child,
        Attribute::Entity(other) => {
            related.create_from_value(other.to_plain(&JsonOptions::default()))?
        }
        Attribute::Value(plain @ Value::Map(_)) => related.create_from_value(plain)?,
        other => {
            return Err(EngineError::InvalidRelationValue {
                key: key.to_string(),
                found: other.kind(),
            });
        }
    };

    debug!(entity = %ty.name(), relation = key, child = %child.cid(), "has-one resolved");
    attach_bubbling(entity, key, BubbleTarget::Entity(child.clone()));
    attributes.insert(key.to_string(), Attribute::Entity(child));
    Ok(())
}

fn resolve_many(
    entity: &Entity,
    ty: &EntityType,
    relation: &Relation,
    attributes: &mut Attributes,
) -> Result<(), EngineError> {
    let key = relation.key();
    let deleted_key = relation.deleted_key();
    let incoming = attributes.remove(key);
    let deleted = attributes.remove(&deleted_key);

    let collection = match entity.get_collection(key) {
        Some(existing) => existing,
        None => Collection::nested(ty.related_type(relation), relation),
    };
    attach_bubbling(entity, key, BubbleTarget::Collection(collection.clone()));

    if let Some(incoming) = incoming
        && let Some(elements) = elements_of(key, incoming)?
    {
        debug!(entity = %ty.name(), relation = key, incoming = elements.len(), "merging nested collection");
        collection.set(elements)?;
    }

    if let Some(deleted) = deleted
        && let Some(elements) = elements_of(&deleted_key, deleted)?
    {
        collection.set_tombstones(elements)?;
    }

    attributes.insert(key.to_string(), Attribute::Collection(collection));
    Ok(())
}

/// Elements carried by an incoming many-relation value. A collection is
/// copied out, never aliased. None for falsy values.
fn elements_of(key: &str, value: Attribute) -> Result<Option<Vec<Element>>, EngineError> {
    let elements = match value {
        Attribute::Value(Value::List(items)) => items.into_iter().map(Element::Raw).collect(),
        Attribute::Value(map @ Value::Map(_)) => vec![Element::Raw(map)],
        Attribute::Value(other) if !other.is_truthy() => return Ok(None),
        Attribute::Value(other) => {
            return Err(EngineError::InvalidRelationValue {
                key: key.to_string(),
                found: other.kind(),
            });
        }
        Attribute::Entity(entity) => vec![Element::Entity(entity)],
        Attribute::Collection(collection) => collection
            .models()
            .into_iter()
            .map(Element::Entity)
            .collect(),
    };
    Ok(Some(elements))
}

/// Once per entity: on a successful sync, drop every tombstone in the graph below it.
fn install_sync_hook(entity: &Entity) {
    if entity.0.sync_hook.get().is_some() {
        return;
    }
    let weak = entity.downgrade();
    let listener = entity.on(move |event| {
        if let EntityEvent::Synced = event
            && let Some(entity) = weak.upgrade()
        {
            clear_tombstones_deep(&entity);
        }
    });
    entity.0.sync_hook.set(Some(listener));
}

pub(crate) fn clear_tombstones_deep(entity: &Entity) {
    for relation in entity.entity_type().relations() {
        match entity.get(relation.key()) {
            Some(Attribute::Collection(collection)) => {
                for member in collection.models() {
                    clear_tombstones_deep(&member);
                }
                collection.reset_tombstones();
            }
            Some(Attribute::Entity(child)) => clear_tombstones_deep(&child),
            _ => {}
        }
    }
}
