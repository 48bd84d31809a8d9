use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pr_tracker::config::Config;
use pr_tracker::events::EventBus;
use pr_tracker::github::OctocrabClient;
use pr_tracker::notifier::{self, WebhookNotifier};
use pr_tracker::persistence::SnapshotStore;
use pr_tracker::poller::Poller;
use pr_tracker::server::{AppState, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_tracker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let store = Arc::new(
        SnapshotStore::open(&config.state_path)
            .with_context(|| format!("opening state at {}", config.state_path.display()))?,
    );

    if config.github_token.is_none() {
        warn!("NPT_GITHUB_TOKEN not set, using unauthenticated GitHub API (60 requests/hour)");
    }
    let github = OctocrabClient::connect(
        &config.github_api_url,
        config.github_token.as_deref(),
        config.repo.clone(),
    )
    .context("building GitHub client")?
    .with_request_timeout(config.request_timeout);

    let bus = Arc::new(EventBus::new());
    if let Some(url) = &config.webhook_url {
        let webhook = WebhookNotifier::new(url.clone()).context("building webhook notifier")?;
        let shown = webhook.redacted_url();
        notifier::attach(&bus, Arc::new(webhook)).context("attaching webhook notifier")?;
        info!(url = %shown, "Webhook notifications enabled");
    } else {
        info!("Webhook notifications disabled (NPT_WEBHOOK_URL not set)");
    }

    let poller = Arc::new(Poller::new(github, store, bus, config.poll_config()));
    let shutdown = CancellationToken::new();

    let poll_task = {
        let poller = poller.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    let app = build_router(AppState::new(poller, shutdown.clone()));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(
        addr = %config.listen_addr,
        repo = %config.repo,
        branches = ?config.branches,
        "Listening"
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("Shutting down");
            server_shutdown.cancel();
        })
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    poll_task.await.context("joining poll loop")?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
