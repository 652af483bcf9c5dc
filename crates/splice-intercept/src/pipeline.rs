//! Listener registry and dispatch
//!
//! Provides [`Pipeline`], shared by every connection. Registration mutates a
//! per-kind priority table under the map's shard lock; dispatch copies the
//! ordered listener list out under a read guard and runs without any lock
//! held, so registrations made mid-dispatch apply to the next message.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::types::{ConnectionId, Direction, Message, Priority};

/// Observes, replaces or cancels messages of one kind
///
/// Returning `None` cancels the message: later listeners are skipped and the
/// message is neither delivered nor forwarded. Listeners run on the
/// connection's own context and must not block indefinitely.
pub trait Listener<M>: Send + Sync {
    /// Handle one message travelling in `direction`
    fn on_message(&self, connection: ConnectionId, direction: Direction, message: M) -> Option<M>;
}

impl<M, F> Listener<M> for F
where
    F: Fn(ConnectionId, Direction, M) -> Option<M> + Send + Sync,
{
    fn on_message(&self, connection: ConnectionId, direction: Direction, message: M) -> Option<M> {
        self(connection, direction, message)
    }
}

/// Handle for one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Result of dispatching one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch<M> {
    /// Message (possibly replaced) to deliver
    Forward(M),
    /// A listener cancelled the message
    Cancelled,
}

impl<M> Dispatch<M> {
    /// Whether the message was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Forwarded message, if any
    #[inline]
    #[must_use]
    pub fn into_message(self) -> Option<M> {
        match self {
            Self::Forward(m) => Some(m),
            Self::Cancelled => None,
        }
    }
}

struct Registration<M> {
    id: ListenerId,
    listener: Arc<dyn Listener<M>>,
}

/// Listeners of one kind, keyed by priority in dispatch order
struct PriorityTable<M> {
    slots: BTreeMap<Priority, Vec<Registration<M>>>,
}

impl<M> PriorityTable<M> {
    fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    fn ordered(&self) -> Vec<Arc<dyn Listener<M>>> {
        self.slots
            .values()
            .flatten()
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }

    fn retain(&mut self, mut keep: impl FnMut(&Registration<M>) -> bool) -> usize {
        let mut removed = 0;
        for registrations in self.slots.values_mut() {
            let before = registrations.len();
            registrations.retain(&mut keep);
            removed += before - registrations.len();
        }
        self.slots.retain(|_, registrations| !registrations.is_empty());
        removed
    }

    fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }
}

fn same_listener<M>(a: &Arc<dyn Listener<M>>, b: &Arc<dyn Listener<M>>) -> bool {
    // compare data pointers only; vtable pointers may differ across codegen units
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Priority-ordered, short-circuiting message pipeline
pub struct Pipeline<M> {
    tables: DashMap<String, PriorityTable<M>>,
    next_id: AtomicU64,
}

impl<M: Message> Pipeline<M> {
    /// Create new empty pipeline
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener` for messages of `kind`
    ///
    /// Listeners sharing a priority run in registration order. The same
    /// listener may be registered more than once.
    pub fn register(
        &self,
        kind: impl Into<String>,
        priority: Priority,
        listener: Arc<dyn Listener<M>>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = kind.into();
        debug!(%kind, %priority, ?id, "listener registered");
        self.tables
            .entry(kind)
            .or_insert_with(PriorityTable::new)
            .slots
            .entry(priority)
            .or_default()
            .push(Registration { id, listener });
        id
    }

    /// Remove every registration of `listener`, returning how many were removed
    pub fn unregister(&self, listener: &Arc<dyn Listener<M>>) -> usize {
        let removed = self.remove_where(|r| same_listener(&r.listener, listener));
        debug!(removed, "listener unregistered");
        removed
    }

    /// Remove one registration
    pub fn unregister_id(&self, id: ListenerId) -> bool {
        self.remove_where(|r| r.id == id) > 0
    }

    fn remove_where(&self, predicate: impl Fn(&Registration<M>) -> bool) -> usize {
        let mut removed = 0;
        for mut table in self.tables.iter_mut() {
            removed += table.retain(|r| !predicate(r));
        }
        self.tables.retain(|_, table| table.len() > 0);
        removed
    }

    /// Number of registrations for `kind`
    #[must_use]
    pub fn listener_count(&self, kind: &str) -> usize {
        self.tables.get(kind).map_or(0, |t| t.len())
    }

    /// Check if nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    fn snapshot(&self, kind: &str) -> Vec<Arc<dyn Listener<M>>> {
        self.tables.get(kind).map(|t| t.ordered()).unwrap_or_default()
    }

    /// Run `message` through every listener of its kind
    pub fn dispatch(&self, connection: ConnectionId, direction: Direction, message: M) -> Dispatch<M> {
        let listeners = self.snapshot(message.kind());
        let mut current = message;
        for (position, listener) in listeners.iter().enumerate() {
            match listener.on_message(connection, direction, current) {
                Some(next) => current = next,
                None => {
                    trace!(%connection, ?direction, position, "message cancelled");
                    return Dispatch::Cancelled;
                }
            }
        }
        Dispatch::Forward(current)
    }
}

impl<M: Message> Default for Pipeline<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Debug for Pipeline<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("kinds", &self.tables.len())
            .finish_non_exhaustive()
    }
}
