//! Inbound tracker webhooks and the notification fan-out they trigger.

pub mod dispatch;
pub mod webhook_server;

pub use dispatch::{dispatch, DispatchReport, EventOutcome, NotificationBridge};
pub use webhook_server::{
    build_webhook_router, run_webhook_server, WebhookServerConfig, WebhookState,
    HEALTH_ENDPOINT, WEBHOOK_ENDPOINT,
};
