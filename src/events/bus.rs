//! Synchronous in-process publish/subscribe.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use super::Event;

/// A subscribed event handler.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Delivers events to every subscribed handler, in subscription order.
///
/// Handlers run on the publisher's thread. A handler that fails or panics is
/// logged and skipped; the remaining handlers still run and the publisher
/// never sees the failure.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Handler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for all subsequent events.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Invokes every handler with `event`.
    ///
    /// The handler list is copied before any handler runs, so a handler may
    /// subscribe further handlers; those only see later events.
    pub fn publish(&self, event: &Event) {
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    event = %event.kind,
                    pr = %event.pr,
                    handler = index,
                    error = %e,
                    "Event handler failed"
                ),
                Err(_) => error!(
                    event = %event.kind,
                    pr = %event.pr,
                    handler = index,
                    "Event handler panicked"
                ),
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
