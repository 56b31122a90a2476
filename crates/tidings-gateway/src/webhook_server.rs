//! HTTP endpoint the tracker posts change events to.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tidings_events::{verify_webhook_signature, ChangeEvent, WEBHOOK_SIGNATURE_HEADER};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::dispatch::{EventOutcome, NotificationBridge};

pub const WEBHOOK_ENDPOINT: &str = "/taiga/incoming";
pub const HEALTH_ENDPOINT: &str = "/healthz";

const NO_ACTION: &str = "No action required";
const ACTIONED: &str = "Actioned!";

#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    pub bind: String,
    pub webhook_secret: String,
}

#[derive(Clone)]
pub struct WebhookState {
    webhook_secret: Arc<str>,
    bridge: Arc<NotificationBridge>,
}

impl WebhookState {
    pub fn new(webhook_secret: &str, bridge: Arc<NotificationBridge>) -> Self {
        Self {
            webhook_secret: Arc::from(webhook_secret),
            bridge,
        }
    }
}

/// Serves webhooks until ctrl-c.
pub async fn run_webhook_server(
    config: WebhookServerConfig,
    bridge: Arc<NotificationBridge>,
) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind webhook server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound webhook server address")?;
    info!(endpoint = WEBHOOK_ENDPOINT, addr = %local_addr, "webhook server listening");

    let app = build_webhook_router(WebhookState::new(&config.webhook_secret, bridge));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("webhook server exited unexpectedly")
}

pub fn build_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route(WEBHOOK_ENDPOINT, post(handle_incoming))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .fallback(handle_not_found)
        .with_state(state)
}

async fn handle_incoming(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if let Err(error) = verify_webhook_signature(&state.webhook_secret, &body, signature) {
        warn!(error = %error, "rejected webhook");
        return (StatusCode::UNAUTHORIZED, error.response_text());
    }

    let event = match ChangeEvent::parse(&body) {
        Ok(event) => event,
        Err(error) => {
            warn!(error = %error, "unprocessable webhook payload");
            return (StatusCode::OK, NO_ACTION);
        }
    };

    match state.bridge.process(&event).await {
        EventOutcome::NoAction => (StatusCode::OK, NO_ACTION),
        EventOutcome::Actioned(report) => {
            info!(
                project_id = event.project_id,
                item_id = event.item.id,
                direct_messages = report.direct_messages,
                channel_messages = report.channel_messages,
                unresolved = report.unresolved_recipients,
                failed = report.failed_sends,
                "webhook actioned"
            );
            (StatusCode::OK, ACTIONED)
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
