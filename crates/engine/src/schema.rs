use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use nestattr_core::Value;
use nestattr_store::Validator;
use tracing::debug;

use crate::attribute::{Attribute, Attributes};
use crate::entity::Entity;
use crate::error::EngineError;

pub const DEFAULT_ID_ATTRIBUTE: &str = "id";
pub const DEFAULT_DESTROY_MARKER: &str = "_destroy";
pub const DEFAULT_CONTAINER_TYPE: &str = "Collection";
/// Relation-less type every schema carries; elements of a many-relation with
/// no declared type fall back to it.
pub const GENERIC_TYPE: &str = "Model";
pub const DELETED_PREFIX: &str = "deleted_";
pub const NESTED_SUFFIX: &str = "_attributes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Named container for a many-relation, optionally carrying its own element type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerType {
    name: String,
    model: Option<String>,
}

impl ContainerType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
        }
    }

    pub fn model(mut self, type_name: impl Into<String>) -> Self {
        self.model = Some(type_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Declaration of a nested relation, as written by the user.
#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    key: String,
    cardinality: Cardinality,
    related_type: Option<String>,
    container_type: Option<ContainerType>,
    serialize_keys: Option<Vec<String>>,
    destroy_marker: String,
}

impl RelationDescriptor {
    fn new(key: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            key: key.into(),
            cardinality,
            related_type: None,
            container_type: None,
            serialize_keys: None,
            destroy_marker: DEFAULT_DESTROY_MARKER.to_string(),
        }
    }

    pub fn one(key: impl Into<String>, related_type: impl Into<String>) -> Self {
        Self::new(key, Cardinality::One).related_type(related_type)
    }

    pub fn many(key: impl Into<String>) -> Self {
        Self::new(key, Cardinality::Many)
    }

    pub fn related_type(mut self, type_name: impl Into<String>) -> Self {
        self.related_type = Some(type_name.into());
        self
    }

    pub fn container_type(mut self, container: ContainerType) -> Self {
        self.container_type = Some(container);
        self
    }

    pub fn serialize_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.serialize_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn destroy_marker(mut self, marker: impl Into<String>) -> Self {
        self.destroy_marker = marker.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A relation after schema resolution: the related type is an index into
/// the schema and the serialize whitelist already contains the destroy marker.
#[derive(Debug, Clone)]
pub struct Relation {
    key: String,
    cardinality: Cardinality,
    related: usize,
    container_name: String,
    serialize_keys: Option<Vec<String>>,
    destroy_marker: String,
}

impl Relation {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn serialize_keys(&self) -> Option<&[String]> {
        self.serialize_keys.as_deref()
    }

    pub fn destroy_marker(&self) -> &str {
        &self.destroy_marker
    }

    /// Key under which tombstones travel in plain attribute sets.
    pub fn deleted_key(&self) -> String {
        format!("{DELETED_PREFIX}{}", self.key)
    }

    /// Key used for the relation when serializing for a nested write.
    pub fn nested_key(&self) -> String {
        format!("{}{NESTED_SUFFIX}", self.key)
    }
}

pub struct EntityTypeBuilder {
    name: String,
    id_attribute: String,
    relations: Vec<RelationDescriptor>,
    undoable: bool,
    validator: Option<Validator<Attribute>>,
}

impl EntityTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            relations: Vec::new(),
            undoable: false,
            validator: None,
        }
    }

    pub fn id_attribute(mut self, key: impl Into<String>) -> Self {
        self.id_attribute = key.into();
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn has_one(self, key: impl Into<String>, related_type: impl Into<String>) -> Self {
        self.relation(RelationDescriptor::one(key, related_type))
    }

    pub fn has_many(self, key: impl Into<String>, related_type: impl Into<String>) -> Self {
        self.relation(RelationDescriptor::many(key).related_type(related_type))
    }

    /// Entities of this type take an undo save-point when constructed.
    pub fn undoable(mut self) -> Self {
        self.undoable = true;
        self
    }

    pub fn validator(mut self, validator: Validator<Attribute>) -> Self {
        self.validator = Some(validator);
        self
    }
}

struct EntityTypeDef {
    name: String,
    id_attribute: String,
    relations: Vec<Relation>,
    undoable: bool,
    validator: Option<Validator<Attribute>>,
}

#[derive(Default)]
pub struct SchemaBuilder {
    types: Vec<EntityTypeBuilder>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity_type: EntityTypeBuilder) -> Self {
        self.types.push(entity_type);
        self
    }

    /// Resolve every relation against the declared types.
    pub fn build(self) -> Result<Schema, EngineError> {
        let mut builders = self.types;
        if !builders.iter().any(|b| b.name == GENERIC_TYPE) {
            builders.push(EntityTypeBuilder::new(GENERIC_TYPE));
        }

        let mut by_name = HashMap::new();
        for (index, builder) in builders.iter().enumerate() {
            if by_name.insert(builder.name.clone(), index).is_some() {
                return Err(EngineError::DuplicateType(builder.name.clone()));
            }
        }
        let generic = by_name
            .get(GENERIC_TYPE)
            .copied()
            .ok_or_else(|| EngineError::UnknownType(GENERIC_TYPE.to_string()))?;

        let mut types = Vec::with_capacity(builders.len());
        for builder in builders {
            let mut relations: Vec<Relation> = Vec::with_capacity(builder.relations.len());
            for descriptor in builder.relations {
                if relations.iter().any(|r| r.key == descriptor.key) {
                    return Err(EngineError::DuplicateRelation {
                        entity_type: builder.name.clone(),
                        key: descriptor.key,
                    });
                }

                let container_model = descriptor
                    .container_type
                    .as_ref()
                    .and_then(|c| c.model.as_deref());
                let related = match descriptor.related_type.as_deref().or(container_model) {
                    Some(name) => by_name.get(name).copied().ok_or_else(|| {
                        EngineError::UnresolvedRelation {
                            entity_type: builder.name.clone(),
                            key: descriptor.key.clone(),
                            related: name.to_string(),
                        }
                    })?,
                    None => generic,
                };

                // Only many-relation members are whitelisted.
                let destroy_marker = descriptor.destroy_marker;
                let serialize_keys = match descriptor.cardinality {
                    Cardinality::Many => descriptor.serialize_keys.map(|mut keys| {
                        if !keys.contains(&destroy_marker) {
                            keys.push(destroy_marker.clone());
                        }
                        keys
                    }),
                    Cardinality::One => None,
                };

                relations.push(Relation {
                    key: descriptor.key,
                    cardinality: descriptor.cardinality,
                    related,
                    container_name: descriptor
                        .container_type
                        .map(|c| c.name)
                        .unwrap_or_else(|| DEFAULT_CONTAINER_TYPE.to_string()),
                    serialize_keys,
                    destroy_marker,
                });
            }

            types.push(EntityTypeDef {
                name: builder.name,
                id_attribute: builder.id_attribute,
                relations,
                undoable: builder.undoable,
                validator: builder.validator,
            });
        }

        debug!(types = types.len(), "schema built");
        Ok(Schema(Rc::new(SchemaInner { types, by_name })))
    }
}

struct SchemaInner {
    types: Vec<EntityTypeDef>,
    by_name: HashMap<String, usize>,
}

/// Immutable registry of entity types. Cheap to clone.
#[derive(Clone)]
pub struct Schema(Rc<SchemaInner>);

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn entity_type(&self, name: &str) -> Result<EntityType, EngineError> {
        let index = self
            .0
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownType(name.to_string()))?;
        Ok(EntityType {
            schema: self.clone(),
            index,
        })
    }

    /// Construct an entity of the named type from plain attributes.
    pub fn create(&self, type_name: &str, attributes: Value) -> Result<Entity, EngineError> {
        self.entity_type(type_name)?.create_from_value(attributes)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.0.types.iter().map(|t| t.name.as_str())
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.type_names()).finish()
    }
}

/// Handle to one type of a schema.
#[derive(Clone)]
pub struct EntityType {
    schema: Schema,
    index: usize,
}

impl EntityType {
    fn def(&self) -> &EntityTypeDef {
        &self.schema.0.types[self.index]
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.def().name
    }

    pub fn id_attribute(&self) -> &str {
        &self.def().id_attribute
    }

    pub fn relations(&self) -> &[Relation] {
        &self.def().relations
    }

    pub fn relation(&self, key: &str) -> Option<&Relation> {
        self.relations().iter().find(|r| r.key == key)
    }

    pub fn is_undoable(&self) -> bool {
        self.def().undoable
    }

    pub fn validator(&self) -> Option<Validator<Attribute>> {
        self.def().validator
    }

    pub fn related_type(&self, relation: &Relation) -> EntityType {
        EntityType {
            schema: self.schema.clone(),
            index: relation.related,
        }
    }

    pub fn create(&self, attributes: Attributes) -> Result<Entity, EngineError> {
        Entity::construct(self.clone(), attributes)
    }

    /// Null creates an empty entity; any other non-map value is rejected.
    pub fn create_from_value(&self, value: Value) -> Result<Entity, EngineError> {
        match value {
            Value::Map(map) => self.create(crate::attribute::from_plain_map(map)),
            Value::Null => self.create(Attributes::new()),
            other => Err(EngineError::InvalidAttributes(format!(
                "cannot build {} from a {} value",
                self.name(),
                other.kind()
            ))),
        }
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.schema.0, &other.schema.0) && self.index == other.index
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({})", self.name())
    }
}
