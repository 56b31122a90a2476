use std::sync::Arc;

use anyhow::{Context, Result};
use tidings_directory::{DirectoryClientConfig, HttpDirectoryClient, IdentityResolver};
use tidings_gateway::{run_webhook_server, NotificationBridge, WebhookServerConfig};
use tidings_slack::{
    run_slack_socket_runtime, InteractionContext, SlackApiClient, SlackClientConfig,
};
use tidings_tracker::{authenticate, HttpTrackerClient, MetadataCache, TrackerClientConfig};
use tracing::info;

use crate::cli_args::Cli;
use crate::config_file::{
    load_config_file, resolve_runtime_settings, RuntimeSettings, TrackerAuth,
};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let file = load_config_file(&cli.config)?;
    let settings = resolve_runtime_settings(&cli, file)?;
    run_bridge(settings).await
}

async fn tracker_token(settings: &RuntimeSettings) -> Result<String> {
    match &settings.tracker_auth {
        TrackerAuth::Token(token) => Ok(token.clone()),
        TrackerAuth::Credentials { username, password } => {
            let token = authenticate(&settings.tracker_url, username, password, settings.http)
                .await
                .context("tracker authentication failed")?;
            info!(username = %username, "authenticated with tracker");
            Ok(token)
        }
    }
}

/// Builds every client, loads both caches, then serves until ctrl-c or
/// until either surface exits.
async fn run_bridge(settings: RuntimeSettings) -> Result<()> {
    let tracker = Arc::new(HttpTrackerClient::new(TrackerClientConfig {
        base_url: settings.tracker_url.clone(),
        auth_token: tracker_token(&settings).await?,
        http: settings.http,
    })?);

    let metadata = MetadataCache::build(tracker.as_ref(), settings.aliases.clone())
        .await
        .context("failed to load tracker metadata")?;
    info!(
        projects = metadata.snapshot().projects().count(),
        "tracker metadata loaded"
    );

    let directory = Arc::new(HttpDirectoryClient::new(DirectoryClientConfig {
        base_url: settings.directory_url.clone(),
        access_token: settings.directory_token.clone(),
        fields: settings.directory_fields.clone(),
        http: settings.http,
    })?);
    let identity = Arc::new(
        IdentityResolver::load(directory, tracker.clone(), settings.identity)
            .await
            .context("failed to load member directory")?,
    );

    let slack = SlackApiClient::new(SlackClientConfig {
        api_base: settings.slack_api_base.clone(),
        bot_token: settings.slack_bot_token.clone(),
        app_token: settings.slack_app_token.clone(),
        http: settings.http,
    })?;
    let bot = slack
        .resolve_bot_identity()
        .await
        .context("failed to resolve slack bot identity")?;
    info!(
        bot_user_id = %bot.user_id,
        team_id = bot.team_id.as_deref().unwrap_or(""),
        "slack bot identity resolved"
    );

    let chat = Arc::new(slack.clone());
    let bridge = Arc::new(NotificationBridge::new(
        chat.clone(),
        identity.clone(),
        settings.classifier.clone(),
    ));
    let context = InteractionContext {
        chat,
        tracker,
        metadata: Arc::new(metadata),
        identity,
    };

    let webhook = run_webhook_server(
        WebhookServerConfig {
            bind: settings.bind.clone(),
            webhook_secret: settings.webhook_secret.clone(),
        },
        bridge,
    );
    let socket = run_slack_socket_runtime(slack, bot.user_id, context, settings.socket);

    tokio::select! {
        result = webhook => result.context("webhook server stopped"),
        result = socket => result.context("slack socket runtime stopped"),
    }
}
