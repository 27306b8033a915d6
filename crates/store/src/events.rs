use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use nestattr_core::ListenerId;
use tracing::trace;

type Callback<E> = Rc<dyn Fn(&E)>;

/// Single-threaded publish/subscribe channel for one event type.
///
/// Dispatch works on a copy of the listener list, so a callback may subscribe
/// or unsubscribe (itself or others) while an event is in flight. A listener
/// removed mid-dispatch is not called for the remainder of that dispatch.
pub struct Emitter<E> {
    listeners: RefCell<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        let id = ListenerId::new();
        self.listeners.borrow_mut().push((id, Rc::new(callback)));
        trace!(listener = ?id, "listener registered");
        id
    }

    /// Returns false if `id` was not registered here.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        before != listeners.len()
    }

    pub fn is_listening(&self, id: ListenerId) -> bool {
        self.listeners.borrow().iter().any(|(listener, _)| *listener == id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(ListenerId, Callback<E>)> = self
            .listeners
            .borrow()
            .iter()
            .map(|(id, callback)| (*id, Rc::clone(callback)))
            .collect();

        for (id, callback) in snapshot {
            if self.is_listening(id) {
                callback(event);
            }
        }
    }
}
