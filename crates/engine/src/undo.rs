use nestattr_core::Value;
use tracing::debug;

use crate::entity::Entity;
use crate::error::EngineError;
use crate::event::EntityEvent;
use crate::options::{JsonOptions, SetOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoStatus {
    /// Nothing changed since the last save-point.
    Clean,
    Dirty,
}

/// Single-level undo bookkeeping attached to one entity.
#[derive(Debug, Default)]
pub(crate) struct UndoState {
    snapshot: Option<Value>,
    changed: bool,
}

impl Entity {
    /// Attach undo tracking (once) and take a save-point. Calling it again
    /// only takes a fresh save-point.
    pub fn undoable(&self) {
        self.save_state();
    }

    pub fn is_undoable(&self) -> bool {
        self.0.undo.borrow().is_some()
    }

    /// Capture the current state, including tombstones, as the restore point.
    pub fn save_state(&self) {
        self.ensure_undo_state();
        self.capture();
        debug!(entity = %self.entity_type().name(), cid = %self.cid(), "state stored");
        self.trigger(EntityEvent::StateStored);
    }

    /// Return to the last save-point. Attributes added since then are removed,
    /// the rest are reassigned from the snapshot. Without a save-point every
    /// attribute is removed.
    pub fn undo(&self) -> Result<(), EngineError> {
        self.ensure_undo_state();
        let snapshot = self
            .0
            .undo
            .borrow()
            .as_ref()
            .and_then(|state| state.snapshot.clone());

        let kept: Vec<String> = snapshot
            .as_ref()
            .and_then(Value::as_map)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        for key in self.keys() {
            if !kept.contains(&key) {
                self.unset(&key, &SetOptions::default());
            }
        }

        if let Some(snapshot) = snapshot {
            self.set_value(snapshot, &SetOptions::default())?;
        }

        self.capture();
        debug!(entity = %self.entity_type().name(), cid = %self.cid(), "state restored");
        self.trigger(EntityEvent::StateRestored);
        Ok(())
    }

    /// False for entities without undo tracking.
    pub fn has_changed_since_sync(&self) -> bool {
        self.0
            .undo
            .borrow()
            .as_ref()
            .is_some_and(|state| state.changed)
    }

    pub fn undo_status(&self) -> UndoStatus {
        if self.has_changed_since_sync() {
            UndoStatus::Dirty
        } else {
            UndoStatus::Clean
        }
    }

    /// The current restore point, if one was taken.
    pub fn snapshot(&self) -> Option<Value> {
        self.0
            .undo
            .borrow()
            .as_ref()
            .and_then(|state| state.snapshot.clone())
    }

    fn ensure_undo_state(&self) {
        if self.is_undoable() {
            return;
        }
        *self.0.undo.borrow_mut() = Some(UndoState::default());

        let weak = self.downgrade();
        self.on(move |event| {
            let Some(entity) = weak.upgrade() else {
                return;
            };
            match event {
                EntityEvent::Changed | EntityEvent::NestedChanged { .. } => entity.mark_dirty(),
                EntityEvent::Synced => entity.save_state(),
                _ => {}
            }
        });
    }

    fn capture(&self) {
        let snapshot = self.to_plain(&JsonOptions::with_deleted());
        if let Some(state) = self.0.undo.borrow_mut().as_mut() {
            state.snapshot = Some(snapshot);
            state.changed = false;
        }
    }

    fn mark_dirty(&self) {
        if let Some(state) = self.0.undo.borrow_mut().as_mut() {
            state.changed = true;
        }
    }
}
