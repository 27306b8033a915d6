use std::cell::RefCell;
use std::rc::Rc;

use nestattr_core::ListenerId;
use nestattr_engine::{Entity, EntityEvent};

/// Captures every event an entity emits, in order.
pub struct EventRecorder {
    entity: Entity,
    listener: ListenerId,
    events: Rc<RefCell<Vec<EntityEvent>>>,
}

impl EventRecorder {
    pub fn attach(entity: &Entity) -> Self {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let listener = entity.on(move |event| sink.borrow_mut().push(event.clone()));
        Self {
            entity: entity.clone(),
            listener,
            events,
        }
    }

    pub fn events(&self) -> Vec<EntityEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, predicate: impl Fn(&EntityEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }

    pub fn changed_count(&self) -> usize {
        self.count(|e| matches!(e, EntityEvent::Changed))
    }

    /// Origins of every `NestedChanged`, in emission order.
    pub fn nested_origins(&self) -> Vec<Entity> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                EntityEvent::NestedChanged { origin } => Some(origin.clone()),
                _ => None,
            })
            .collect()
    }

    /// Origins of every `RelationChanged` for `key`.
    pub fn relation_origins(&self, key: &str) -> Vec<Entity> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                EntityEvent::RelationChanged { key: k, origin } if k == key => Some(origin.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn detach(self) {
        self.entity.off(self.listener);
    }
}
