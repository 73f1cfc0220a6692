//! Event Handler Registry
//!
//! Maps event type tags (e.g. `push__weights`) to the asynchronous handlers that
//! consume them. Several handlers may listen on the same tag; each is invoked once
//! per matching event, in registration order.

use super::event::NetEvent;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Type alias for a thread-safe, asynchronous event handler.
pub type EventHandlerFn =
    Arc<dyn Fn(NetEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Handle returned on registration, used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct EventDispatcher {
    handlers: DashMap<String, Vec<(ListenerId, EventHandlerFn)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `handler` for every inbound event tagged `event_type`.
    pub fn add_listener<F, Fut>(&self, event_type: &str, handler: F) -> ListenerId
    where
        F: Fn(NetEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler_fn: EventHandlerFn = Arc::new(move |event: NetEvent| {
            Box::pin(handler(event)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        self.handlers
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler_fn));

        tracing::debug!("Registered listener {:?} for '{}'", id, event_type);
        id
    }

    /// Removes a handler. Returns false when it was not registered.
    pub fn remove_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.handlers.get_mut(event_type) {
            let before = entry.len();
            entry.retain(|(listener, _)| *listener != id);
            removed = entry.len() != before;
        }
        self.handlers
            .remove_if(event_type, |_, handlers| handlers.is_empty());
        removed
    }

    pub fn has_listeners(&self, event_type: &str) -> bool {
        self.listener_count(event_type) > 0
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.handlers
            .get(event_type)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    pub fn event_types(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Runs every handler registered for the event's tag and returns how many ran.
    ///
    /// Handler failures are logged; they never stop the remaining handlers.
    pub async fn dispatch(&self, event: NetEvent) -> usize {
        // Snapshot first so no map guard is held across an await
        let handlers: Vec<EventHandlerFn> = match self.handlers.get(&event.event_type) {
            Some(entry) => entry.iter().map(|(_, handler)| handler.clone()).collect(),
            None => {
                tracing::debug!(
                    "No listener for '{}' from node {}",
                    event.event_type,
                    event.src_node
                );
                return 0;
            }
        };

        for handler in &handlers {
            if let Err(e) = handler(event.clone()).await {
                tracing::error!(
                    "Handler for '{}' from node {} failed: {:#}",
                    event.event_type,
                    event.src_node,
                    e
                );
            }
        }

        handlers.len()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}
