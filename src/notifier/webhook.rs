//! HTTP webhook sink.

use std::time::Duration;

use chrono::SecondsFormat;
use serde::Serialize;

use super::{Notifier, NotifyError};
use crate::events::Event;

/// Bound on a single delivery.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body posted for each event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub event: &'static str,
    pub pr_number: u64,
    pub title: String,
    pub author: String,
    /// Empty unless the event is a branch landing.
    pub branch: String,
    /// RFC 3339.
    pub timestamp: String,
}

impl From<&Event> for WebhookPayload {
    fn from(event: &Event) -> Self {
        WebhookPayload {
            event: event.kind.as_str(),
            pr_number: event.pr.0,
            title: event.title.clone(),
            author: event.author.clone(),
            branch: event.branch.clone().unwrap_or_default(),
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Posts every event as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The endpoint as `scheme://host[:port]/***`, safe to log. Path, query
    /// and credentials are dropped.
    pub fn redacted_url(&self) -> String {
        match reqwest::Url::parse(&self.url) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}://{}:{}/***", url.scheme(), host, port),
                (Some(host), None) => format!("{}://{}/***", url.scheme(), host),
                (None, _) => "***".to_string(),
            },
            Err(_) => "***".to_string(),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        let payload = WebhookPayload::from(event);
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::types::{PrNumber, TrackedPr};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    async fn spawn_sink(status: StatusCode) -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().route(
            "/hook",
            post(move |axum::Json(body): axum::Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{addr}/hook"), rx)
    }

    fn landed_event() -> Event {
        let pr = TrackedPr::new(PrNumber(50), "glibc: 2.39 -> 2.40", "dave", Utc::now());
        Event {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            ..Event::landed(&pr, "nixos-unstable")
        }
    }

    #[test]
    fn payload_shape() {
        let payload = WebhookPayload::from(&landed_event());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["event"], "pr_landed_branch");
        assert_eq!(json["pr_number"], 50);
        assert_eq!(json["title"], "glibc: 2.39 -> 2.40");
        assert_eq!(json["author"], "dave");
        assert_eq!(json["branch"], "nixos-unstable");
        assert_eq!(json["timestamp"], "2025-03-01T12:00:00Z");
    }

    #[test]
    fn branch_is_empty_for_non_landing_events() {
        let pr = TrackedPr::new(PrNumber(1), "", "", Utc::now());
        let payload = WebhookPayload::from(&Event::for_pr(EventKind::Merged, &pr));
        assert_eq!(payload.branch, "");
        assert_eq!(payload.event, "pr_merged");
    }

    #[test]
    fn redacted_url_keeps_only_scheme_and_host() {
        let webhook =
            WebhookNotifier::new("https://user:pw@hooks.example.com/services/T000/SECRET?token=abc")
                .unwrap();
        let shown = webhook.redacted_url();

        assert_eq!(shown, "https://hooks.example.com/***");
        assert!(!shown.contains("SECRET"));
        assert!(!shown.contains("pw"));
    }

    #[test]
    fn redacted_url_keeps_port_and_hides_garbage() {
        let webhook = WebhookNotifier::new("http://127.0.0.1:9000/hook/abc").unwrap();
        assert_eq!(webhook.redacted_url(), "http://127.0.0.1:9000/***");

        let webhook = WebhookNotifier::new("not a url/with-secret").unwrap();
        assert_eq!(webhook.redacted_url(), "***");
    }

    #[tokio::test]
    async fn posts_payload_to_url() {
        let (url, mut rx) = spawn_sink(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url).unwrap();

        notifier.notify(&landed_event()).await.unwrap();

        let body = rx.recv().await.unwrap();
        assert_eq!(body["event"], "pr_landed_branch");
        assert_eq!(body["pr_number"], 50);
    }

    #[tokio::test]
    async fn error_status_is_a_failure() {
        let (url, _rx) = spawn_sink(StatusCode::BAD_REQUEST).await;
        let notifier = WebhookNotifier::new(url).unwrap();

        let err = notifier.notify(&landed_event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 400 }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::new(format!("http://{addr}/hook")).unwrap();
        let err = notifier.notify(&landed_event()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Request(_)));
    }
}
