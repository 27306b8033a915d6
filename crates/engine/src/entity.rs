use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use nestattr_core::{ClientId, ListenerId, Value};
use nestattr_store::{AttributeStore, Change, Emitter};
use tracing::debug;

use crate::attribute::{self, Attribute, Attributes};
use crate::bubbling::{self, BubbleLink};
use crate::collection::Collection;
use crate::error::EngineError;
use crate::event::EntityEvent;
use crate::merge;
use crate::options::SetOptions;
use crate::schema::{Cardinality, EntityType};
use crate::undo::UndoState;

pub(crate) struct EntityInner {
    pub(crate) cid: ClientId,
    pub(crate) ty: EntityType,
    pub(crate) attributes: RefCell<AttributeStore<Attribute>>,
    pub(crate) events: Emitter<EntityEvent>,
    /// Listeners this entity holds on its relation values.
    pub(crate) bubbling: RefCell<Vec<BubbleLink>>,
    pub(crate) sync_hook: Cell<Option<ListenerId>>,
    pub(crate) undo: RefCell<Option<UndoState>>,
}

impl Drop for EntityInner {
    fn drop(&mut self) {
        for link in self.bubbling.get_mut().drain(..) {
            link.target.off(link.listener);
        }
    }
}

/// Shared handle to a live entity. Clones alias the same entity; equality is
/// reference identity.
#[derive(Clone)]
pub struct Entity(pub(crate) Rc<EntityInner>);

#[derive(Clone)]
pub(crate) struct WeakEntity(Weak<EntityInner>);

impl WeakEntity {
    pub(crate) fn upgrade(&self) -> Option<Entity> {
        self.0.upgrade().map(Entity)
    }
}

impl Entity {
    pub(crate) fn construct(ty: EntityType, attributes: Attributes) -> Result<Entity, EngineError> {
        let undoable = ty.is_undoable();
        let entity = Entity(Rc::new(EntityInner {
            cid: ClientId::new(),
            ty,
            attributes: RefCell::new(AttributeStore::new()),
            events: Emitter::new(),
            bubbling: RefCell::new(Vec::new()),
            sync_hook: Cell::new(None),
            undo: RefCell::new(None),
        }));

        entity.set(attributes, &SetOptions::default())?;
        if undoable {
            entity.undoable();
        }
        Ok(entity)
    }

    pub(crate) fn downgrade(&self) -> WeakEntity {
        WeakEntity(Rc::downgrade(&self.0))
    }

    pub fn cid(&self) -> ClientId {
        self.0.cid
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.0.ty
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Value of the id attribute, if set and not null.
    pub fn id(&self) -> Option<Value> {
        match self.0.attributes.borrow().get(self.0.ty.id_attribute()) {
            Some(Attribute::Value(value)) if !value.is_null() => Some(value.clone()),
            _ => None,
        }
    }

    /// True until the entity carries an id.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn get(&self, key: &str) -> Option<Attribute> {
        self.0.attributes.borrow().get(key).cloned()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).and_then(|a| a.as_value().cloned())
    }

    pub fn get_entity(&self, key: &str) -> Option<Entity> {
        self.get(key).and_then(|a| a.as_entity().cloned())
    }

    pub fn get_collection(&self, key: &str) -> Option<Collection> {
        self.get(key).and_then(|a| a.as_collection().cloned())
    }

    /// Present and not null.
    pub fn has(&self, key: &str) -> bool {
        self.0
            .attributes
            .borrow()
            .get(key)
            .is_some_and(|a| !a.is_null())
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.attributes.borrow().keys().cloned().collect()
    }

    pub fn attributes(&self) -> Attributes {
        self.0.attributes.borrow().to_map()
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Assign attributes, resolving every declared relation first. On error,
    /// relation values wired during this call are released again.
    pub fn set(&self, attributes: Attributes, opts: &SetOptions) -> Result<(), EngineError> {
        let wired = bubbling::link_listeners(self);
        let result = merge::resolve_relations(self, attributes)
            .and_then(|resolved| self.store(resolved, opts));
        if result.is_err() {
            bubbling::detach_bubbling_except(self, &wired);
        }
        result
    }

    pub fn set_key(
        &self,
        key: &str,
        value: impl Into<Attribute>,
        opts: &SetOptions,
    ) -> Result<(), EngineError> {
        let mut attributes = BTreeMap::new();
        attributes.insert(key.to_string(), value.into());
        self.set(attributes, opts)
    }

    /// Assign a plain map. Null is a no-op.
    pub fn set_value(&self, value: Value, opts: &SetOptions) -> Result<(), EngineError> {
        match value {
            Value::Null => Ok(()),
            Value::Map(map) => self.set(attribute::from_plain_map(map), opts),
            other => Err(EngineError::InvalidAttributes(format!(
                "expected a map of attributes, got {}",
                other.kind()
            ))),
        }
    }

    /// Remove one attribute without going through relation resolution.
    /// Returns false if the key was not present.
    pub fn unset(&self, key: &str, opts: &SetOptions) -> bool {
        let removed = self.0.attributes.borrow_mut().remove(key);
        match removed {
            Some(change) => {
                let changes = [change];
                bubbling::release_relation_values(self, &changes);
                self.notify(&changes, opts);
                true
            }
            None => false,
        }
    }

    /// Detach from every relation value, drop tombstones, then remove every
    /// attribute. Safe to call repeatedly.
    pub fn clear(&self, opts: &SetOptions) {
        bubbling::detach_all_bubbling(self);
        for relation in self.0.ty.relations() {
            if relation.cardinality() == Cardinality::Many
                && let Some(collection) = self.get_collection(relation.key())
            {
                collection.reset_tombstones();
            }
        }
        let changes = self.0.attributes.borrow_mut().clear();
        self.notify(&changes, opts);
    }

    fn store(&self, attributes: Attributes, opts: &SetOptions) -> Result<(), EngineError> {
        if opts.validate
            && let Some(validator) = self.0.ty.validator()
        {
            self.0.attributes.borrow().validate(&attributes, validator)?;
        }

        let changes = self.0.attributes.borrow_mut().assign(attributes);
        bubbling::release_relation_values(self, &changes);
        self.notify(&changes, opts);
        Ok(())
    }

    fn notify(&self, changes: &[Change<Attribute>], opts: &SetOptions) {
        if opts.silent || changes.is_empty() {
            return;
        }
        for change in changes {
            self.0.events.emit(&EntityEvent::AttributeChanged {
                key: change.key.clone(),
            });
        }
        self.0.events.emit(&EntityEvent::Changed);
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn on<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&EntityEvent) + 'static,
    {
        self.0.events.on(callback)
    }

    pub fn off(&self, listener: ListenerId) -> bool {
        self.0.events.off(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.0.events.listener_count()
    }

    /// Emit an event on this entity as if it had happened.
    pub fn trigger(&self, event: EntityEvent) {
        self.0.events.emit(&event);
    }

    /// Signal a successful persistence round-trip.
    pub fn mark_synced(&self) {
        debug!(entity = %self.0.ty.name(), cid = %self.0.cid, "synced");
        self.0.events.emit(&EntityEvent::Synced);
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct(self.0.ty.name());
        debug.field("cid", &self.0.cid);
        if let Ok(attributes) = self.0.attributes.try_borrow() {
            for (key, value) in attributes.iter() {
                match value {
                    Attribute::Value(value) => debug.field(key, value),
                    Attribute::Entity(entity) => debug.field(key, &entity.cid()),
                    Attribute::Collection(collection) => debug.field(key, &collection.len()),
                };
            }
        }
        debug.finish()
    }
}
