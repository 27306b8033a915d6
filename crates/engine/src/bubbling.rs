use nestattr_core::ListenerId;
use nestattr_store::Change;
use tracing::trace;

use crate::attribute::Attribute;
use crate::collection::Collection;
use crate::entity::Entity;
use crate::event::{CollectionEvent, EntityEvent};

/// A relation value a parent listens to.
#[derive(Clone)]
pub(crate) enum BubbleTarget {
    Entity(Entity),
    Collection(Collection),
}

impl BubbleTarget {
    pub(crate) fn from_attribute(attribute: &Attribute) -> Option<Self> {
        match attribute {
            Attribute::Entity(entity) => Some(BubbleTarget::Entity(entity.clone())),
            Attribute::Collection(collection) => Some(BubbleTarget::Collection(collection.clone())),
            Attribute::Value(_) => None,
        }
    }

    fn same(&self, other: &BubbleTarget) -> bool {
        match (self, other) {
            (BubbleTarget::Entity(a), BubbleTarget::Entity(b)) => a.ptr_eq(b),
            (BubbleTarget::Collection(a), BubbleTarget::Collection(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn off(&self, listener: ListenerId) {
        match self {
            BubbleTarget::Entity(entity) => entity.off(listener),
            BubbleTarget::Collection(collection) => collection.off(listener),
        };
    }
}

/// One entry of a parent's wiring table.
pub(crate) struct BubbleLink {
    pub(crate) relation_key: String,
    pub(crate) target: BubbleTarget,
    pub(crate) listener: ListenerId,
}

/// Make `parent` re-emit changes observed on `target` under `relation_key`.
/// Wiring the same (key, target) pair twice is a no-op.
pub(crate) fn attach_bubbling(parent: &Entity, relation_key: &str, target: BubbleTarget) {
    let wired = parent
        .0
        .bubbling
        .borrow()
        .iter()
        .any(|link| link.relation_key == relation_key && link.target.same(&target));
    if wired {
        return;
    }

    let weak_parent = parent.downgrade();
    let key = relation_key.to_string();
    let listener = match &target {
        BubbleTarget::Entity(child) => {
            let weak_child = child.downgrade();
            child.on(move |event| {
                let origin = match event {
                    EntityEvent::Changed => weak_child.upgrade(),
                    EntityEvent::NestedChanged { origin } => Some(origin.clone()),
                    _ => None,
                };
                if let (Some(parent), Some(origin)) = (weak_parent.upgrade(), origin) {
                    bubble(&parent, &key, origin);
                }
            })
        }
        BubbleTarget::Collection(collection) => collection.on(move |event| {
            let origin = match event {
                CollectionEvent::Add { entity }
                | CollectionEvent::Remove { entity }
                | CollectionEvent::Changed { entity } => entity.clone(),
                CollectionEvent::NestedChanged { origin } => origin.clone(),
                CollectionEvent::Reset => return,
            };
            if let Some(parent) = weak_parent.upgrade() {
                bubble(&parent, &key, origin);
            }
        }),
    };

    trace!(parent = %parent.cid(), relation = relation_key, "bubbling attached");
    parent.0.bubbling.borrow_mut().push(BubbleLink {
        relation_key: relation_key.to_string(),
        target,
        listener,
    });
}

fn bubble(parent: &Entity, relation_key: &str, origin: Entity) {
    parent.trigger(EntityEvent::NestedChanged {
        origin: origin.clone(),
    });
    parent.trigger(EntityEvent::RelationChanged {
        key: relation_key.to_string(),
        origin,
    });
}

pub(crate) fn detach_bubbling(parent: &Entity, relation_key: &str, target: &BubbleTarget) {
    let detached: Vec<BubbleLink> = {
        let mut links = parent.0.bubbling.borrow_mut();
        let (detached, kept): (Vec<BubbleLink>, Vec<BubbleLink>) = std::mem::take(&mut *links)
            .into_iter()
            .partition(|link| link.relation_key == relation_key && link.target.same(target));
        *links = kept;
        detached
    };
    for link in detached {
        trace!(parent = %parent.cid(), relation = relation_key, "bubbling detached");
        link.target.off(link.listener);
    }
}

pub(crate) fn detach_all_bubbling(parent: &Entity) {
    let links = std::mem::take(&mut *parent.0.bubbling.borrow_mut());
    for link in links {
        trace!(parent = %parent.cid(), relation = %link.relation_key, "bubbling detached");
        link.target.off(link.listener);
    }
}

pub(crate) fn link_listeners(parent: &Entity) -> Vec<ListenerId> {
    parent.0.bubbling.borrow().iter().map(|link| link.listener).collect()
}

/// Drop every link whose listener is not in `kept`.
pub(crate) fn detach_bubbling_except(parent: &Entity, kept: &[ListenerId]) {
    let detached: Vec<BubbleLink> = {
        let mut links = parent.0.bubbling.borrow_mut();
        let (retained, detached): (Vec<BubbleLink>, Vec<BubbleLink>) =
            std::mem::take(&mut *links)
                .into_iter()
                .partition(|link| kept.contains(&link.listener));
        *links = retained;
        detached
    };
    for link in detached {
        trace!(parent = %parent.cid(), relation = %link.relation_key, "uninstalled value released");
        link.target.off(link.listener);
    }
}

/// Stop listening to relation values that an assignment replaced or removed.
pub(crate) fn release_relation_values(parent: &Entity, changes: &[Change<Attribute>]) {
    for change in changes {
        if parent.entity_type().relation(&change.key).is_none() {
            continue;
        }
        if let Some(target) = change.previous.as_ref().and_then(BubbleTarget::from_attribute) {
            detach_bubbling(parent, &change.key, &target);
        }
    }
}

impl Entity {
    /// Number of relation values this entity currently listens to.
    pub fn bubbling_link_count(&self) -> usize {
        self.0.bubbling.borrow().len()
    }
}
