//! Slack Socket Mode runtime that receives button presses, `/issue` commands,
//! bot mentions and direct messages, and hands each one to its flow.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tidings_directory::IdentityResolver;
use tidings_tracker::{MetadataCache, TrackerClient};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::chat_platform::ChatPlatform;
use crate::issue_intake::{IssueIntake, IssueRequest, IssueSource};
use crate::message_blocks::{is_watch_action, WatchTarget};
use crate::watch_action::{handle_watch, WatchRequest};

pub mod slack_api_client;

pub use slack_api_client::{
    SlackApiClient, SlackBotIdentity, SlackClientConfig, DEFAULT_SLACK_API_BASE,
};

pub const DEFAULT_ISSUE_COMMAND: &str = "/issue";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct SlackSocketRuntimeConfig {
    pub reconnect_delay: Duration,
    pub issue_command: String,
}

impl Default for SlackSocketRuntimeConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            issue_command: DEFAULT_ISSUE_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A chat-side request the bridge acts on.
pub enum SlackInteraction {
    Issue(IssueRequest),
    Watch(WatchRequest),
}

#[derive(Clone)]
/// Shared collaborators for interaction flows.
pub struct InteractionContext {
    pub chat: Arc<dyn ChatPlatform>,
    pub tracker: Arc<dyn TrackerClient>,
    pub metadata: Arc<MetadataCache>,
    pub identity: Arc<IdentityResolver>,
}

impl InteractionContext {
    pub async fn handle(&self, interaction: SlackInteraction) -> Result<()> {
        match interaction {
            SlackInteraction::Issue(request) => {
                let intake = IssueIntake {
                    chat: self.chat.as_ref(),
                    tracker: self.tracker.as_ref(),
                    metadata: self.metadata.as_ref(),
                };
                let outcome = intake.handle(&request).await?;
                debug!(chat_user = %request.chat_user_id, outcome = ?outcome, "issue intake finished");
            }
            SlackInteraction::Watch(request) => {
                let outcome = handle_watch(
                    self.chat.as_ref(),
                    self.tracker.as_ref(),
                    self.identity.as_ref(),
                    &request,
                )
                .await?;
                debug!(chat_user = %request.chat_user_id, outcome = ?outcome, "watch request finished");
            }
        }
        Ok(())
    }
}

/// Runs the Socket Mode loop until ctrl-c, reconnecting after every session.
pub async fn run_slack_socket_runtime(
    client: SlackApiClient,
    bot_user_id: String,
    context: InteractionContext,
    config: SlackSocketRuntimeConfig,
) -> Result<()> {
    let runtime = SlackSocketRuntime {
        client,
        bot_user_id,
        context: Arc::new(context),
        config,
    };
    runtime.run().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Reconnect,
    Shutdown,
}

struct SlackSocketRuntime {
    client: SlackApiClient,
    bot_user_id: String,
    context: Arc<InteractionContext>,
    config: SlackSocketRuntimeConfig,
}

impl SlackSocketRuntime {
    async fn run(&self) -> Result<()> {
        let mut failure_streak = 0_usize;
        loop {
            match self.client.open_socket_connection().await {
                Ok(socket_url) => {
                    info!("slack socket connected");
                    match self.run_socket_session(&socket_url).await {
                        Ok(SessionEnd::Shutdown) => {
                            info!("slack socket shutdown requested");
                            return Ok(());
                        }
                        Ok(SessionEnd::Reconnect) => failure_streak = 0,
                        Err(error) => {
                            failure_streak = failure_streak.saturating_add(1);
                            warn!(failure_streak, error = %error, "slack socket session error");
                        }
                    }
                }
                Err(error) => {
                    failure_streak = failure_streak.saturating_add(1);
                    warn!(failure_streak, error = %error, "slack socket open failed");
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("slack socket shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn run_socket_session(&self, socket_url: &str) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .with_context(|| "failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(SessionEnd::Shutdown);
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(SessionEnd::Reconnect);
                    };
                    let message = message_result.context("failed reading slack websocket message")?;
                    let Some(envelope) = parse_socket_envelope(message)? else {
                        continue;
                    };
                    if let Some(envelope_id) = envelope.envelope_id.as_deref() {
                        ack_envelope(&mut sink, envelope_id).await?;
                    }
                    if envelope.envelope_type == "disconnect" {
                        info!("slack requested socket reconnect");
                        return Ok(SessionEnd::Reconnect);
                    }
                    self.dispatch(&envelope);
                }
            }
        }
    }

    /// Handles one envelope on its own task so slow tracker calls never delay acks.
    fn dispatch(&self, envelope: &SlackSocketEnvelope) {
        let interaction = match normalize_socket_envelope(
            envelope,
            &self.bot_user_id,
            &self.config.issue_command,
        ) {
            Ok(Some(interaction)) => interaction,
            Ok(None) => return,
            Err(error) => {
                warn!(envelope_type = %envelope.envelope_type, error = %error, "ignored malformed slack envelope");
                return;
            }
        };
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            if let Err(error) = context.handle(interaction).await {
                warn!(error = %error, "slack interaction failed");
            }
        });
    }
}

async fn ack_envelope<S>(sink: &mut S, envelope_id: &str) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    sink.send(WsMessage::Text(ack.into()))
        .await
        .context("failed to send slack socket ack")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SlackSocketEnvelope {
    /// Absent on `hello` and `disconnect` frames.
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

fn parse_socket_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    match message {
        WsMessage::Text(text) => {
            let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Binary(bytes) => {
            let text =
                String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?;
            let envelope = serde_json::from_str::<SlackSocketEnvelope>(&text)
                .context("failed to parse slack socket envelope")?;
            Ok(Some(envelope))
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Ok(None),
        WsMessage::Close(_) => Ok(None),
        WsMessage::Frame(_) => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct SlackEventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    event: SlackEventPayload,
}

#[derive(Debug, Deserialize)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackSlashCommandPayload {
    command: String,
    #[serde(default)]
    text: String,
    user_id: String,
    response_url: String,
}

#[derive(Debug, Deserialize)]
struct SlackBlockActionsPayload {
    #[serde(rename = "type")]
    payload_type: String,
    user: SlackIdRef,
    #[serde(default)]
    channel: Option<SlackIdRef>,
    #[serde(default)]
    actions: Vec<SlackBlockAction>,
}

#[derive(Debug, Deserialize)]
struct SlackIdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SlackBlockAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn normalize_socket_envelope(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
    issue_command: &str,
) -> Result<Option<SlackInteraction>> {
    match envelope.envelope_type.as_str() {
        "events_api" => normalize_event_callback(&envelope.payload, bot_user_id),
        "slash_commands" => normalize_slash_command(&envelope.payload, issue_command),
        "interactive" => normalize_block_actions(&envelope.payload),
        _ => Ok(None),
    }
}

fn normalize_event_callback(payload: &Value, bot_user_id: &str) -> Result<Option<SlackInteraction>> {
    let callback = serde_json::from_value::<SlackEventCallbackEnvelope>(payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }

    let event = callback.event;
    // Edits, deletions and bot posts all arrive with a subtype.
    if event.subtype.is_some() || event.bot_id.is_some() {
        return Ok(None);
    }
    let Some(user_id) = non_empty(event.user) else {
        return Ok(None);
    };
    if user_id == bot_user_id {
        return Ok(None);
    }
    let Some(channel_id) = non_empty(event.channel) else {
        return Ok(None);
    };
    let Some(ts) = non_empty(event.ts) else {
        return Ok(None);
    };
    let thread_ts = non_empty(event.thread_ts);

    let source = match event.event_type.as_str() {
        "app_mention" => IssueSource::Mention {
            channel_id,
            ts,
            thread_ts,
        },
        "message" if event.channel_type.as_deref() == Some("im") || channel_id.starts_with('D') => {
            IssueSource::DirectMessage {
                channel_id,
                thread_ts,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(SlackInteraction::Issue(IssueRequest {
        chat_user_id: user_id,
        text: event.text.unwrap_or_default(),
        source,
    })))
}

fn normalize_slash_command(payload: &Value, issue_command: &str) -> Result<Option<SlackInteraction>> {
    let command = serde_json::from_value::<SlackSlashCommandPayload>(payload.clone())
        .context("failed to decode slack slash command payload")?;
    if command.command.trim() != issue_command {
        return Ok(None);
    }
    Ok(Some(SlackInteraction::Issue(IssueRequest {
        chat_user_id: command.user_id,
        text: command.text,
        source: IssueSource::SlashCommand {
            response_url: command.response_url,
        },
    })))
}

/// Only watch buttons need handling; link buttons just open a URL.
fn normalize_block_actions(payload: &Value) -> Result<Option<SlackInteraction>> {
    let actions = serde_json::from_value::<SlackBlockActionsPayload>(payload.clone())
        .context("failed to decode slack interactive payload")?;
    if actions.payload_type != "block_actions" {
        return Ok(None);
    }
    let Some(action) = actions
        .actions
        .into_iter()
        .find(|action| is_watch_action(&action.action_id))
    else {
        return Ok(None);
    };
    let Some(channel) = actions.channel else {
        return Ok(None);
    };
    let value = action
        .value
        .ok_or_else(|| anyhow!("watch action {} has no value", action.action_id))?;
    let target = serde_json::from_str::<WatchTarget>(&value)
        .with_context(|| format!("invalid watch target in action {}", action.action_id))?;
    Ok(Some(SlackInteraction::Watch(WatchRequest {
        chat_user_id: actions.user.id,
        channel_id: channel.id,
        target,
    })))
}
