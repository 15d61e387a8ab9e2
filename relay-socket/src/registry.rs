//! Per-connection event registry.
//!
//! An ordered multimap from event name to handlers. Registration order is
//! dispatch order, and a handler registered twice runs twice. Dispatch is
//! synchronous on the caller's thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

/// A registered event handler receiving the event's argument by reference.
pub type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered event name -> handler list mapping.
///
/// `emit` snapshots the handler list before invoking it and never holds the
/// lock while a handler runs. A handler may therefore register further
/// handlers (or emit) from inside a dispatch; handlers added that way are
/// first invoked by the next `emit` of that event.
pub struct EventRegistry<A> {
    handlers: RwLock<HashMap<String, Vec<Handler<A>>>>,
}

impl<A> EventRegistry<A> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Append `handler` to the list for `event`, creating the list if absent.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Invoke every handler registered for `event`, in registration order.
    ///
    /// Returns the number of handlers invoked; zero when nothing is
    /// registered, which is not an error.
    pub fn emit(&self, event: &str, arg: &A) -> usize {
        let snapshot = match self.handlers.read().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        trace!("dispatching {event} to {} handler(s)", snapshot.len());
        for handler in &snapshot {
            handler(arg);
        }
        snapshot.len()
    }

    /// Number of handlers registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Remove every handler registered for `event`.
    pub fn clear(&self, event: &str) {
        self.handlers.write().remove(event);
    }

    /// Names of all events with at least one handler, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl<A> Default for EventRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("events", &self.event_names())
            .finish()
    }
}
