//! HTTP server for the tracker.
//!
//! # Endpoints
//!
//! - `POST /api/prs` - Starts tracking a PR
//! - `GET /api/prs` - Lists tracked PRs as JSON
//! - `DELETE /api/prs/{number}` - Stops tracking a PR
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::github::GitHubApi;
use crate::poller::Poller;

pub mod prs;

pub use prs::{AddPrRequest, ApiError, add_pr, delete_pr, list_prs};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<G> {
    inner: Arc<AppStateInner<G>>,
}

struct AppStateInner<G> {
    /// The engine shared with the background poll loop.
    poller: Arc<Poller<G>>,

    /// Cancelled on shutdown; aborts in-flight GitHub calls made by handlers.
    shutdown: CancellationToken,
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        AppState {
            inner: self.inner.clone(),
        }
    }
}

impl<G: GitHubApi> AppState<G> {
    pub fn new(poller: Arc<Poller<G>>, shutdown: CancellationToken) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { poller, shutdown }),
        }
    }

    pub fn poller(&self) -> &Poller<G> {
        &self.inner.poller
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}

/// Liveness probe. Returns 200 with the text "OK".
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Builds the axum Router with all endpoints.
pub fn build_router<G: GitHubApi + 'static>(app_state: AppState<G>) -> Router {
    Router::new()
        .route("/api/prs", get(list_prs::<G>).post(add_pr::<G>))
        .route("/api/prs/{number}", delete(delete_pr::<G>))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
