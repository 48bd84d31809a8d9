//! Outbound notification sinks.
//!
//! A [`Notifier`] is attached to the [`EventBus`] with [`attach`]. Delivery is
//! best-effort: each event is handed to the tokio runtime and the publisher
//! moves on immediately. Failures are logged and never retried.

mod webhook;

pub use webhook::{WebhookNotifier, WebhookPayload};

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::events::{Event, EventBus};

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The request never got a response.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with an error status.
    #[error("endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// [`attach`] was called outside a tokio runtime.
    #[error("no tokio runtime available to deliver notifications")]
    NoRuntime,
}

/// A destination for lifecycle events.
pub trait Notifier: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Delivers one event.
    fn notify(&self, event: &Event) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Subscribes `notifier` to every event published on `bus`.
///
/// Must be called from within a tokio runtime; deliveries are spawned onto
/// that runtime.
pub fn attach<N: Notifier>(bus: &EventBus, notifier: Arc<N>) -> Result<(), NotifyError> {
    let runtime = Handle::try_current().map_err(|_| NotifyError::NoRuntime)?;

    bus.subscribe(move |event| {
        let notifier = notifier.clone();
        let event = event.clone();
        runtime.spawn(async move {
            match notifier.notify(&event).await {
                Ok(()) => debug!(
                    notifier = notifier.name(),
                    event = %event.kind,
                    pr = %event.pr,
                    "Notification delivered"
                ),
                Err(e) => warn!(
                    notifier = notifier.name(),
                    event = %event.kind,
                    pr = %event.pr,
                    error = %e,
                    "Notification failed"
                ),
            }
        });
        Ok(())
    });

    Ok(())
}
