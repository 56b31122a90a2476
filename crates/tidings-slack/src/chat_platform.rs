use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
/// A message as posted to a channel or direct conversation.
pub struct OutgoingMessage {
    pub text: String,
    pub blocks: Vec<Value>,
    /// Display name override; `None` posts under the bot's own name.
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub thread_ts: Option<String>,
}

impl OutgoingMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn in_thread(mut self, thread_ts: Option<String>) -> Self {
        self.thread_ts = thread_ts;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatProfile {
    pub user_id: String,
    pub real_name: Option<String>,
    pub display_name: Option<String>,
    pub image_72: Option<String>,
}

impl ChatProfile {
    /// Real name when set, else the display name, else the raw user ID.
    pub fn preferred_name(&self) -> &str {
        [self.real_name.as_deref(), self.display_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .unwrap_or(self.user_id.as_str())
    }

    /// Display name when set, else the real name.
    pub fn short_name(&self) -> &str {
        [self.display_name.as_deref(), self.real_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .unwrap_or(self.user_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub user: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[async_trait]
/// Chat platform send and lookup primitives used by the bridge.
pub trait ChatPlatform: Send + Sync {
    async fn send_direct_message(
        &self,
        user_id: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage>;

    async fn send_channel_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage>;

    async fn send_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()>;

    /// Replies through a slash command's response URL.
    async fn respond(&self, response_url: &str, text: &str) -> Result<()>;

    async fn user_profile(&self, user_id: &str) -> Result<ChatProfile>;

    async fn thread_root(&self, channel_id: &str, thread_ts: &str)
        -> Result<Option<ThreadMessage>>;
}
