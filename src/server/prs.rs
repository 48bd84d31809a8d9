//! PR tracking endpoints.
//!
//! - `POST /api/prs` with `{"pr_number": n}` starts tracking a PR
//! - `GET /api/prs` lists tracked PRs, highest number first
//! - `DELETE /api/prs/{number}` stops tracking a PR

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use super::AppState;
use crate::github::GitHubApi;
use crate::persistence::StoreError;
use crate::poller::{TrackError, TrackOutcome};
use crate::types::{PrNumber, PrView};

/// Errors returned by the PR endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Track(#[from] TrackError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("PR {0} is not tracked")]
    NotTracked(PrNumber),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, retry_after) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::NotTracked(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            ApiError::Track(e) => match e {
                TrackError::Invalid(_) => (StatusCode::BAD_REQUEST, None),
                TrackError::GitHub(_) => (StatusCode::BAD_GATEWAY, None),
                TrackError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
                TrackError::RateLimited { reset_at } => {
                    let secs = (*reset_at - Utc::now()).num_seconds().max(1);
                    (StatusCode::SERVICE_UNAVAILABLE, Some(secs))
                }
                TrackError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, None),
            },
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "Request rejected");
        }

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Body of `POST /api/prs`.
#[derive(Debug, Deserialize)]
pub struct AddPrRequest {
    /// Signed so that negative numbers are reported as invalid rather than
    /// as a JSON error.
    pub pr_number: i64,
}

/// `POST /api/prs`
///
/// - 201 with the PR when newly tracked
/// - 200 with the PR when it was already tracked, or when it had already
///   landed everywhere and was removed again straight away
/// - 400 for malformed bodies or non-positive numbers
/// - 502 when GitHub cannot be reached or does not know the PR
/// - 503 with `retry-after` while rate limited
pub async fn add_pr<G: GitHubApi + 'static>(
    State(state): State<AppState<G>>,
    body: Result<Json<AddPrRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PrView>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let number = u64::try_from(request.pr_number)
        .ok()
        .filter(|n| *n > 0)
        .map(PrNumber)
        .ok_or_else(|| ApiError::BadRequest("pr_number must be positive".to_string()))?;

    let outcome = state.poller().track(number, state.shutdown()).await?;
    let status = match outcome {
        TrackOutcome::Added(_) => StatusCode::CREATED,
        TrackOutcome::AlreadyTracked(_) | TrackOutcome::Completed(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome.pr().view(state.poller().branches()))))
}

/// `GET /api/prs`
pub async fn list_prs<G: GitHubApi + 'static>(
    State(state): State<AppState<G>>,
) -> Json<Vec<PrView>> {
    let branches = state.poller().branches();
    let views = state
        .poller()
        .store()
        .list()
        .iter()
        .map(|pr| pr.view(branches))
        .collect();
    Json(views)
}

/// `DELETE /api/prs/{number}`
pub async fn delete_pr<G: GitHubApi + 'static>(
    State(state): State<AppState<G>>,
    Path(number): Path<String>,
) -> Result<StatusCode, ApiError> {
    let number = number
        .parse::<u64>()
        .map(PrNumber)
        .map_err(|_| ApiError::BadRequest(format!("invalid PR number: {}", number)))?;

    match state.poller().untrack(number)? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotTracked(number)),
    }
}
