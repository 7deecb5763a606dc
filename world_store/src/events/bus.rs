//! Synchronous in-process publish/subscribe.
//!
//! Handlers run on the publisher's thread before `publish` returns. A handler
//! that fails or panics is logged and skipped; delivery to the rest continues.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use super::{kinds, Event, EventQuery};

/// Callback invoked for each delivered event.
///
/// `C` is the delivery context; the store's bus hands handlers the store
/// itself so they can issue further operations.
pub type EventHandler<C> = Arc<dyn Fn(&C, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription<C> {
    id: SubscriptionId,
    event_type: String,
    handler: EventHandler<C>,
}

/// Default bound on the in-memory event log.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

pub struct EventBus<C> {
    subscriptions: RwLock<Vec<Subscription<C>>>,
    next_id: AtomicU64,
    log: Mutex<VecDeque<Event>>,
    log_capacity: usize,
    handler_failures: AtomicU64,
}

impl<C> fmt::Debug for EventBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count(None))
            .field("log_capacity", &self.log_capacity)
            .field("handler_failures", &self.handler_failures())
            .finish()
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl<C> EventBus<C> {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            log: Mutex::new(VecDeque::with_capacity(log_capacity.min(1024))),
            log_capacity,
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Register a handler for one event type, or `"*"` for every event.
    ///
    /// Handlers for the same type run in registration order.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&C, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event_type = event_type.into();
        debug!(subscription = %id, event_type = %event_type, "Handler subscribed");
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                event_type,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a handler. Returns `false` if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of handlers for `event_type`, or all handlers for `None`.
    pub fn listener_count(&self, event_type: Option<&str>) -> usize {
        let subs = self.subscriptions.read().unwrap_or_else(PoisonError::into_inner);
        match event_type {
            Some(t) => subs.iter().filter(|s| s.event_type == t).count(),
            None => subs.len(),
        }
    }

    /// Drop every handler and empty the log.
    pub fn clear(&self) {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Total handler failures (errors and panics) since creation.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Log the event, then deliver it to matching handlers.
    ///
    /// Type-specific handlers run first, then wildcard handlers. Handlers
    /// subscribed during delivery do not see the event being delivered.
    /// Returns how many handlers completed successfully.
    pub fn publish(&self, context: &C, event: &Event) -> usize {
        self.append_to_log(event.clone());

        let handlers: Vec<(SubscriptionId, EventHandler<C>)> = {
            let subs = self.subscriptions.read().unwrap_or_else(PoisonError::into_inner);
            let specific = subs.iter().filter(|s| s.event_type == event.event_type);
            let wildcard = subs
                .iter()
                .filter(|s| s.event_type == kinds::ALL && event.event_type != kinds::ALL);
            specific
                .chain(wildcard)
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(context, event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %id,
                        event_type = %event.event_type,
                        error = %err,
                        "Event handler failed"
                    );
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %id,
                        event_type = %event.event_type,
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    fn append_to_log(&self, event: Event) {
        if self.log_capacity == 0 {
            return;
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        while log.len() >= self.log_capacity {
            log.pop_front();
        }
        log.push_back(event);
    }

    /// Events from the in-memory log, most recent first.
    pub fn get_events(&self, query: &EventQuery) -> Vec<Event> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(query.limit)
            .cloned()
            .collect()
    }
}
