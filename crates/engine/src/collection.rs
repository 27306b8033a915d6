use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use nestattr_core::{ClientId, ListenerId, Value};
use nestattr_store::Emitter;
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::error::EngineError;
use crate::event::{CollectionEvent, EntityEvent};
use crate::options::{JsonOptions, SetOptions};
use crate::schema::{DEFAULT_CONTAINER_TYPE, EntityType, Relation};

/// Input to collection reconciliation: either plain attributes or a live entity.
#[derive(Debug, Clone)]
pub enum Element {
    Raw(Value),
    Entity(Entity),
}

impl From<Value> for Element {
    fn from(value: Value) -> Self {
        Element::Raw(value)
    }
}

impl From<Entity> for Element {
    fn from(entity: Entity) -> Self {
        Element::Entity(entity)
    }
}

/// Soft-delete bookkeeping of a collection that backs a many-relation.
pub(crate) struct SoftDelete {
    destroy_marker: String,
    tombstones: Collection,
}

pub(crate) struct CollectionInner {
    cid: ClientId,
    type_name: String,
    model: EntityType,
    models: RefCell<Vec<Entity>>,
    /// Member cid -> listener that forwards the member's changes.
    forwarding: RefCell<Vec<(ClientId, ListenerId)>>,
    events: Emitter<CollectionEvent>,
    soft_delete: Option<SoftDelete>,
}

impl Drop for CollectionInner {
    fn drop(&mut self) {
        let forwarding = std::mem::take(self.forwarding.get_mut());
        for member in self.models.get_mut().iter() {
            for (cid, listener) in &forwarding {
                if *cid == member.cid() {
                    member.off(*listener);
                }
            }
        }
    }
}

/// Ordered set of entities of one type, keyed by id attribute when present
/// and by reference otherwise.
#[derive(Clone)]
pub struct Collection(Rc<CollectionInner>);

impl Collection {
    pub fn new(model: EntityType) -> Self {
        Self::build(model, DEFAULT_CONTAINER_TYPE.to_string(), None)
    }

    /// Collection backing a many-relation: removed members that were persisted
    /// become tombstones.
    pub fn nested(model: EntityType, relation: &Relation) -> Self {
        let soft_delete = SoftDelete {
            destroy_marker: relation.destroy_marker().to_string(),
            tombstones: Collection::new(model.clone()),
        };
        Self::build(model, relation.container_name().to_string(), Some(soft_delete))
    }

    fn build(model: EntityType, type_name: String, soft_delete: Option<SoftDelete>) -> Self {
        Collection(Rc::new(CollectionInner {
            cid: ClientId::new(),
            type_name,
            model,
            models: RefCell::new(Vec::new()),
            forwarding: RefCell::new(Vec::new()),
            events: Emitter::new(),
            soft_delete,
        }))
    }

    pub fn cid(&self) -> ClientId {
        self.0.cid
    }

    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    pub fn model_type(&self) -> &EntityType {
        &self.0.model
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.models.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.models.borrow().is_empty()
    }

    pub fn at(&self, index: usize) -> Option<Entity> {
        self.0.models.borrow().get(index).cloned()
    }

    /// Copy of the member list.
    pub fn models(&self) -> Vec<Entity> {
        self.0.models.borrow().clone()
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.0.models.borrow().iter().any(|m| m.ptr_eq(entity))
    }

    pub fn get_by_id(&self, id: &Value) -> Option<Entity> {
        self.models()
            .into_iter()
            .find(|m| m.id().as_ref() == Some(id))
    }

    /// Soft-deleted members. None for a plain collection.
    pub fn tombstones(&self) -> Option<Collection> {
        self.0.soft_delete.as_ref().map(|s| s.tombstones.clone())
    }

    pub fn destroy_marker(&self) -> Option<&str> {
        self.0.soft_delete.as_ref().map(|s| s.destroy_marker.as_str())
    }

    pub fn to_plain(&self, opts: &JsonOptions) -> Value {
        Value::List(self.plain_elements(opts))
    }

    pub fn plain_elements(&self, opts: &JsonOptions) -> Vec<Value> {
        self.models().iter().map(|m| m.to_plain(opts)).collect()
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn on<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.0.events.on(callback)
    }

    pub fn off(&self, listener: ListenerId) -> bool {
        self.0.events.off(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.0.events.listener_count()
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Add one element. A member matching it by reference or id is returned
    /// unchanged.
    pub fn add(&self, element: impl Into<Element>) -> Result<Entity, EngineError> {
        let element = element.into();
        if let Some(existing) = self.find_match(&self.models(), &element) {
            return Ok(existing);
        }
        let entity = self.materialize(element)?;
        self.0.models.borrow_mut().push(entity.clone());
        self.adopt(&entity)?;
        self.announce(&entity)?;
        Ok(entity)
    }

    /// Returns false if `entity` is not a member.
    pub fn remove(&self, entity: &Entity) -> Result<bool, EngineError> {
        let removed = {
            let mut models = self.0.models.borrow_mut();
            match models.iter().position(|m| m.ptr_eq(entity)) {
                Some(index) => {
                    models.remove(index);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return Ok(false);
        }

        self.stop_forwarding(entity);
        if let Some(soft_delete) = &self.0.soft_delete {
            if entity.is_new() {
                debug!(collection = %self.0.type_name, member = %entity.cid(), "unsaved member dropped");
            } else {
                entity.set_key(&soft_delete.destroy_marker, true, &SetOptions::default())?;
                soft_delete.tombstones.add(entity.clone())?;
                debug!(collection = %self.0.type_name, member = %entity.cid(), "member tombstoned");
            }
        }
        self.0.events.emit(&CollectionEvent::Remove {
            entity: entity.clone(),
        });
        Ok(true)
    }

    /// Reconcile membership with `elements`: matching members are updated in
    /// place, new ones are added, missing ones are removed. The resulting order
    /// follows `elements`. Removals are announced before additions.
    pub fn set(&self, elements: Vec<Element>) -> Result<(), EngineError> {
        let current = self.models();
        let mut ordered: Vec<Entity> = Vec::with_capacity(elements.len());
        let mut added: Vec<Entity> = Vec::new();

        for element in elements {
            if let Some(existing) = self.find_match(&current, &element) {
                match element {
                    Element::Raw(value) => existing.set_value(value, &SetOptions::default())?,
                    Element::Entity(other) if !other.ptr_eq(&existing) => {
                        existing.set(other.attributes(), &SetOptions::default())?
                    }
                    Element::Entity(_) => {}
                }
                if !ordered.iter().any(|m| m.ptr_eq(&existing)) {
                    ordered.push(existing);
                }
                continue;
            }

            if let Some(duplicate) = self.find_match(&added, &element) {
                if let Element::Raw(value) = element {
                    duplicate.set_value(value, &SetOptions::default())?;
                }
                continue;
            }

            let entity = self.materialize(element)?;
            added.push(entity.clone());
            ordered.push(entity);
        }

        let stale: Vec<Entity> = current
            .iter()
            .filter(|m| !ordered.iter().any(|o| o.ptr_eq(m)))
            .cloned()
            .collect();
        for entity in &stale {
            self.remove(entity)?;
        }

        *self.0.models.borrow_mut() = ordered;
        for entity in &added {
            self.adopt(entity)?;
        }
        for entity in &added {
            self.announce(entity)?;
        }

        debug!(
            collection = %self.0.type_name,
            added = added.len(),
            removed = stale.len(),
            len = self.len(),
            "collection reconciled"
        );
        Ok(())
    }

    /// Drop every member without soft-deleting them.
    pub fn reset(&self) {
        let models = std::mem::take(&mut *self.0.models.borrow_mut());
        for entity in &models {
            self.stop_forwarding(entity);
        }
        self.0.events.emit(&CollectionEvent::Reset);
    }

    pub fn reset_tombstones(&self) {
        if let Some(soft_delete) = &self.0.soft_delete {
            soft_delete.tombstones.reset();
        }
    }

    /// Reconcile the tombstones with `elements`. Elements that match a live
    /// member are skipped.
    pub(crate) fn set_tombstones(&self, elements: Vec<Element>) -> Result<(), EngineError> {
        let Some(soft_delete) = &self.0.soft_delete else {
            return Ok(());
        };
        let live = self.models();
        let elements = elements
            .into_iter()
            .filter(|element| match self.find_match(&live, element) {
                Some(member) => {
                    warn!(
                        collection = %self.0.type_name,
                        member = %member.cid(),
                        "tombstone matches a live member, skipped"
                    );
                    false
                }
                None => true,
            })
            .collect();
        soft_delete.tombstones.set(elements)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn find_match(&self, candidates: &[Entity], element: &Element) -> Option<Entity> {
        let id_attribute = self.0.model.id_attribute();
        let id = match element {
            Element::Entity(entity) => {
                if let Some(found) = candidates.iter().find(|m| m.ptr_eq(entity)) {
                    return Some(found.clone());
                }
                entity.id()
            }
            Element::Raw(value) => value.get(id_attribute).filter(|id| !id.is_null()).cloned(),
        }?;
        candidates
            .iter()
            .find(|m| m.id().as_ref() == Some(&id))
            .cloned()
    }

    fn materialize(&self, element: Element) -> Result<Entity, EngineError> {
        match element {
            Element::Entity(entity) if *entity.entity_type() == self.0.model => Ok(entity),
            Element::Entity(other) => self
                .0
                .model
                .create_from_value(other.to_plain(&JsonOptions::default())),
            Element::Raw(value) => self.0.model.create_from_value(value),
        }
    }

    /// Wire a member that was just placed in the list and announce it.
    /// A member re-added under a tombstoned id leaves the tombstones before any
    /// `Add` of the same batch is emitted.
    fn adopt(&self, entity: &Entity) -> Result<(), EngineError> {
        self.start_forwarding(entity);
        if let Some(soft_delete) = &self.0.soft_delete {
            let tombstones = &soft_delete.tombstones;
            let element = Element::Entity(entity.clone());
            if let Some(stale) = tombstones.find_match(&tombstones.models(), &element) {
                tombstones.remove(&stale)?;
            }
        }
        Ok(())
    }

    fn announce(&self, entity: &Entity) -> Result<(), EngineError> {
        self.0.events.emit(&CollectionEvent::Add {
            entity: entity.clone(),
        });

        if let Some(soft_delete) = &self.0.soft_delete
            && entity
                .get_value(&soft_delete.destroy_marker)
                .is_some_and(|marker| marker.is_truthy())
        {
            self.remove(entity)?;
        }
        Ok(())
    }

    fn start_forwarding(&self, entity: &Entity) {
        let cid = entity.cid();
        if self.0.forwarding.borrow().iter().any(|(member, _)| *member == cid) {
            return;
        }
        let collection = Rc::downgrade(&self.0);
        let member = entity.downgrade();
        let listener = entity.on(move |event| {
            let forwarded = match event {
                EntityEvent::Changed => match member.upgrade() {
                    Some(entity) => CollectionEvent::Changed { entity },
                    None => return,
                },
                EntityEvent::NestedChanged { origin } => CollectionEvent::NestedChanged {
                    origin: origin.clone(),
                },
                _ => return,
            };
            if let Some(inner) = collection.upgrade() {
                inner.events.emit(&forwarded);
            }
        });
        self.0.forwarding.borrow_mut().push((cid, listener));
    }

    fn stop_forwarding(&self, entity: &Entity) {
        let cid = entity.cid();
        let listeners: Vec<ListenerId> = {
            let mut forwarding = self.0.forwarding.borrow_mut();
            let listeners = forwarding
                .iter()
                .filter(|(member, _)| *member == cid)
                .map(|(_, listener)| *listener)
                .collect();
            forwarding.retain(|(member, _)| *member != cid);
            listeners
        };
        for listener in listeners {
            entity.off(listener);
        }
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Collection {}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&self.0.type_name)
            .field("cid", &self.0.cid)
            .field("model", &self.0.model.name())
            .field("len", &self.0.models.try_borrow().map(|m| m.len()).ok())
            .finish()
    }
}
