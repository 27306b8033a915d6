use std::collections::BTreeMap;

use nestattr_core::Value;

use crate::attribute::Attribute;
use crate::entity::Entity;
use crate::error::EngineError;
use crate::options::JsonOptions;

impl Entity {
    /// Plain value tree of this entity and everything below it.
    pub fn to_plain(&self, opts: &JsonOptions) -> Value {
        let attributes = self.attributes();
        let relations = self.entity_type().relations();
        let is_live_relation = |key: &str, attribute: &Attribute| {
            !matches!(attribute, Attribute::Value(_)) && relations.iter().any(|r| r.key() == key)
        };

        let mut plain: BTreeMap<String, Value> = attributes
            .iter()
            .filter(|(key, attribute)| !is_live_relation(key.as_str(), attribute))
            .map(|(key, attribute)| (key.clone(), attribute.to_plain(opts)))
            .collect();

        for relation in relations {
            let key = relation.key();
            let (mut value, tombstones) = match attributes.get(key) {
                Some(Attribute::Entity(entity)) => (entity.to_plain(opts), None),
                Some(Attribute::Collection(collection)) => {
                    (collection.to_plain(opts), collection.tombstones())
                }
                _ => continue,
            };

            if opts.with_deleted
                && let Some(tombstones) = &tombstones
            {
                plain.insert(relation.deleted_key(), tombstones.to_plain(opts));
            }

            let mut output_key = key.to_string();
            if opts.nested {
                if let (Value::List(items), Some(tombstones)) = (&mut value, &tombstones) {
                    items.extend(tombstones.plain_elements(opts));
                }
                output_key = relation.nested_key();
            }

            if let (Some(keys), Value::List(items)) = (relation.serialize_keys(), &mut value) {
                for item in items.iter_mut() {
                    *item = item.pick(keys);
                }
            }

            plain.insert(output_key, value);
        }

        Value::Map(plain)
    }

    /// Independent copy built from this entity's plain form.
    pub fn deep_clone(&self) -> Result<Entity, EngineError> {
        self.entity_type()
            .create_from_value(self.to_plain(&JsonOptions::default()))
    }
}
