use std::collections::BTreeMap;

use nestattr_core::Value;

use crate::collection::Collection;
use crate::entity::Entity;
use crate::options::JsonOptions;

/// What an entity stores under one key.
///
/// Entities and collections compare by reference, plain values by content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Value(Value),
    Entity(Entity),
    Collection(Collection),
}

pub type Attributes = BTreeMap<String, Attribute>;

impl Attribute {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attribute::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Attribute::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Attribute::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Attribute::Value(Value::Null))
    }

    /// Live entities and collections are always truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Attribute::Value(value) => value.is_truthy(),
            Attribute::Entity(_) | Attribute::Collection(_) => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Attribute::Value(value) => value.kind(),
            Attribute::Entity(_) => "entity",
            Attribute::Collection(_) => "collection",
        }
    }

    pub fn to_plain(&self, opts: &JsonOptions) -> Value {
        match self {
            Attribute::Value(value) => value.clone(),
            Attribute::Entity(entity) => entity.to_plain(opts),
            Attribute::Collection(collection) => collection.to_plain(opts),
        }
    }
}

pub(crate) fn from_plain_map(map: BTreeMap<String, Value>) -> Attributes {
    map.into_iter()
        .map(|(key, value)| (key, Attribute::Value(value)))
        .collect()
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Attribute::Value(value)
    }
}

impl From<Entity> for Attribute {
    fn from(entity: Entity) -> Self {
        Attribute::Entity(entity)
    }
}

impl From<Collection> for Attribute {
    fn from(collection: Collection) -> Self {
        Attribute::Collection(collection)
    }
}

macro_rules! plain_attribute_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Attribute {
                fn from(value: $ty) -> Self {
                    Attribute::Value(Value::from(value))
                }
            }
        )*
    };
}

plain_attribute_from!(&str, String, i64, i32, bool, f64);
