//! Slack Web API client used for notification fan-out and interactive replies.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tidings_core::{
    build_http_client, is_retryable_status, is_retryable_transport_error, parse_retry_after,
    retry_delay, truncate_for_error, HttpClientSettings,
};

use crate::chat_platform::{ChatPlatform, ChatProfile, OutgoingMessage, PostedMessage, ThreadMessage};

const SLACK_USER_AGENT: &str = "tidings-slack-bridge";
pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    team_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOkResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversationsOpenResponse {
    ok: bool,
    channel: Option<SlackChannelRef>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChannelRef {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUsersInfoResponse {
    ok: bool,
    user: Option<SlackUser>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUser {
    id: String,
    #[serde(default)]
    profile: SlackUserProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackUserProfile {
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    display_name_normalized: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    image_72: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackRepliesResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<SlackReply>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReply {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The bot's own identity as reported by `auth.test`.
pub struct SlackBotIdentity {
    pub user_id: String,
    pub team_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackClientConfig {
    pub api_base: String,
    pub bot_token: String,
    pub app_token: String,
    pub http: HttpClientSettings,
}

fn slack_failure(operation: &str, error: Option<String>) -> anyhow::Error {
    anyhow!(
        "slack {operation} failed: {}",
        error.unwrap_or_else(|| "unknown error".to_string())
    )
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(config: SlackClientConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            bail!("slack bot token cannot be empty");
        }
        let settings = config.http.normalized();
        let http = build_http_client(
            SLACK_USER_AGENT,
            reqwest::header::HeaderMap::new(),
            settings,
        )?;
        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            app_token: config.app_token.trim().to_string(),
            bot_token: config.bot_token.trim().to_string(),
            retry_max_attempts: settings.retry_max_attempts,
            retry_base_delay_ms: settings.retry_base_delay_ms,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    pub async fn resolve_bot_identity(&self) -> Result<SlackBotIdentity> {
        let response: SlackAuthTestResponse = self
            .request_json(
                "auth.test",
                || self.http.post(self.url("auth.test")).bearer_auth(&self.bot_token),
                true,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("auth.test", response.error));
        }
        let user_id = response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))?;
        Ok(SlackBotIdentity {
            user_id,
            team_id: response.team_id,
        })
    }

    pub async fn open_socket_connection(&self) -> Result<String> {
        if self.app_token.is_empty() {
            bail!("slack app token is required for socket mode");
        }
        let response: SlackOpenSocketResponse = self
            .request_json(
                "apps.connections.open",
                || {
                    self.http
                        .post(self.url("apps.connections.open"))
                        .bearer_auth(&self.app_token)
                },
                true,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("apps.connections.open", response.error));
        }
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("slack apps.connections.open did not return url"))
    }

    pub async fn open_direct_channel(&self, user_id: &str) -> Result<String> {
        let payload = json!({ "users": user_id });
        let response: SlackConversationsOpenResponse = self
            .request_json(
                "conversations.open",
                || {
                    self.http
                        .post(self.url("conversations.open"))
                        .bearer_auth(&self.bot_token)
                        .json(&payload)
                },
                true,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("conversations.open", response.error));
        }
        response
            .channel
            .map(|channel| channel.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("slack conversations.open did not return a channel"))
    }

    pub async fn post_message(
        &self,
        channel: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": message.text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if !message.blocks.is_empty() {
            payload["blocks"] = Value::Array(message.blocks.clone());
        }
        if let Some(username) = message.username.as_deref() {
            payload["username"] = Value::String(username.to_string());
        }
        if let Some(icon_url) = message.icon_url.as_deref() {
            payload["icon_url"] = Value::String(icon_url.to_string());
        }
        if let Some(thread_ts) = message.thread_ts.as_deref() {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        // chat.postMessage is not idempotent; a retried timeout could double-post.
        let response: SlackChatMessageResponse = self
            .request_json(
                "chat.postMessage",
                || {
                    self.http
                        .post(self.url("chat.postMessage"))
                        .bearer_auth(&self.bot_token)
                        .json(&payload)
                },
                false,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("chat.postMessage", response.error));
        }
        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    pub async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        let mut payload = json!({
            "channel": channel,
            "user": user,
            "text": text,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }
        let response: SlackOkResponse = self
            .request_json(
                "chat.postEphemeral",
                || {
                    self.http
                        .post(self.url("chat.postEphemeral"))
                        .bearer_auth(&self.bot_token)
                        .json(&payload)
                },
                false,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("chat.postEphemeral", response.error));
        }
        Ok(())
    }

    pub async fn users_info(&self, user: &str) -> Result<ChatProfile> {
        let response: SlackUsersInfoResponse = self
            .request_json(
                "users.info",
                || {
                    self.http
                        .get(self.url("users.info"))
                        .bearer_auth(&self.bot_token)
                        .query(&[("user", user)])
                },
                true,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("users.info", response.error));
        }
        let user = response
            .user
            .ok_or_else(|| anyhow!("slack users.info did not return a user"))?;
        let profile = user.profile;
        Ok(ChatProfile {
            user_id: user.id,
            real_name: profile.real_name,
            display_name: profile.display_name_normalized.or(profile.display_name),
            image_72: profile.image_72,
        })
    }

    pub async fn conversation_root(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Option<ThreadMessage>> {
        let response: SlackRepliesResponse = self
            .request_json(
                "conversations.replies",
                || {
                    self.http
                        .get(self.url("conversations.replies"))
                        .bearer_auth(&self.bot_token)
                        .query(&[("channel", channel), ("ts", thread_ts), ("limit", "1")])
                },
                true,
            )
            .await?;
        if !response.ok {
            return Err(slack_failure("conversations.replies", response.error));
        }
        Ok(response.messages.into_iter().next().map(|reply| ThreadMessage {
            user: reply.user,
            text: reply.text,
        }))
    }

    pub async fn post_response_url(&self, response_url: &str, text: &str) -> Result<()> {
        let payload = json!({
            "response_type": "ephemeral",
            "text": text,
        });
        let response = self
            .http
            .post(response_url)
            .json(&payload)
            .send()
            .await
            .context("slack response_url request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "slack response_url failed with status {}: {}",
                status.as_u16(),
                truncate_for_error(&body, 320)
            );
        }
        Ok(())
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F, retryable: bool) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let max_attempts = if retryable { self.retry_max_attempts } else { 1 };
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder().send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode slack {operation}"))?;
                        return Ok(parsed);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < max_attempts && is_retryable_status(status.as_u16()) {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "slack api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl ChatPlatform for SlackApiClient {
    async fn send_direct_message(
        &self,
        user_id: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage> {
        let channel = self.open_direct_channel(user_id).await?;
        self.post_message(&channel, message).await
    }

    async fn send_channel_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage> {
        self.post_message(channel_id, message).await
    }

    async fn send_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        self.post_ephemeral(channel_id, user_id, text, thread_ts)
            .await
    }

    async fn respond(&self, response_url: &str, text: &str) -> Result<()> {
        self.post_response_url(response_url, text).await
    }

    async fn user_profile(&self, user_id: &str) -> Result<ChatProfile> {
        self.users_info(user_id).await
    }

    async fn thread_root(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Option<ThreadMessage>> {
        self.conversation_root(channel_id, thread_ts).await
    }
}
