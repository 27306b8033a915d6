use std::collections::BTreeMap;

use crate::error::StoreError;

/// Checks a prospective attribute set (current attributes overlaid with the
/// incoming ones) before it is committed.
pub type Validator<V> = fn(&BTreeMap<String, V>) -> Result<(), String>;

/// One attribute that actually changed during an assignment.
#[derive(Debug, Clone)]
pub struct Change<V> {
    pub key: String,
    /// None = attribute did not exist before.
    pub previous: Option<V>,
}

/// Flat key/value attribute storage with change detection.
#[derive(Debug, Clone)]
pub struct AttributeStore<V> {
    attributes: BTreeMap<String, V>,
}

impl<V> Default for AttributeStore<V> {
    fn default() -> Self {
        Self {
            attributes: BTreeMap::new(),
        }
    }
}

impl<V: Clone + PartialEq> AttributeStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.attributes.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.attributes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Copy of the whole attribute map.
    pub fn to_map(&self) -> BTreeMap<String, V> {
        self.attributes.clone()
    }

    /// Run `validator` against the attributes as they would be after
    /// assigning `incoming`. Nothing is modified.
    pub fn validate(
        &self,
        incoming: &BTreeMap<String, V>,
        validator: Validator<V>,
    ) -> Result<(), StoreError> {
        let mut prospective = self.attributes.clone();
        for (key, value) in incoming {
            prospective.insert(key.clone(), value.clone());
        }
        validator(&prospective).map_err(StoreError::Validation)
    }

    /// Assign every incoming attribute. Returns only the attributes whose
    /// value actually changed, in key order.
    pub fn assign(&mut self, incoming: BTreeMap<String, V>) -> Vec<Change<V>> {
        let mut changes = Vec::new();
        for (key, value) in incoming {
            match self.attributes.get(&key) {
                Some(current) if *current == value => {}
                _ => {
                    let previous = self.attributes.insert(key.clone(), value);
                    changes.push(Change { key, previous });
                }
            }
        }
        changes
    }

    /// Remove a single attribute. None if it was not present.
    pub fn remove(&mut self, key: &str) -> Option<Change<V>> {
        self.attributes.remove(key).map(|previous| Change {
            key: key.to_string(),
            previous: Some(previous),
        })
    }

    /// Remove every attribute, reporting each one as a change.
    pub fn clear(&mut self) -> Vec<Change<V>> {
        std::mem::take(&mut self.attributes)
            .into_iter()
            .map(|(key, previous)| Change {
                key,
                previous: Some(previous),
            })
            .collect()
    }
}
