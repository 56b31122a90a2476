//! Recording [`ChatPlatform`] used by tests across the workspace.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::chat_platform::{
    ChatPlatform, ChatProfile, OutgoingMessage, PostedMessage, ThreadMessage,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEphemeral {
    pub channel: String,
    pub user: String,
    pub text: String,
    pub thread_ts: Option<String>,
}

#[derive(Default)]
struct RecordingState {
    direct_messages: Vec<(String, OutgoingMessage)>,
    channel_messages: Vec<(String, OutgoingMessage)>,
    ephemerals: Vec<RecordedEphemeral>,
    responses: Vec<(String, String)>,
    profiles: HashMap<String, ChatProfile>,
    thread_root: Option<ThreadMessage>,
    failing_recipients: HashSet<String>,
    sequence: u64,
}

#[derive(Default)]
pub struct RecordingChat {
    state: Mutex<RecordingState>,
}

impl RecordingChat {
    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_profile(&self, profile: ChatProfile) {
        self.lock()
            .profiles
            .insert(profile.user_id.clone(), profile);
    }

    pub fn set_thread_root(&self, root: ThreadMessage) {
        self.lock().thread_root = Some(root);
    }

    /// Sends to this user or channel ID fail from now on.
    pub fn fail_recipient(&self, recipient: &str) {
        self.lock().failing_recipients.insert(recipient.to_string());
    }

    pub fn direct_messages(&self) -> Vec<(String, OutgoingMessage)> {
        self.lock().direct_messages.clone()
    }

    pub fn channel_messages(&self) -> Vec<(String, OutgoingMessage)> {
        self.lock().channel_messages.clone()
    }

    pub fn ephemerals(&self) -> Vec<RecordedEphemeral> {
        self.lock().ephemerals.clone()
    }

    pub fn responses(&self) -> Vec<(String, String)> {
        self.lock().responses.clone()
    }

    fn record(
        &self,
        recipient: &str,
        message: &OutgoingMessage,
        direct: bool,
    ) -> Result<PostedMessage> {
        let mut state = self.lock();
        if state.failing_recipients.contains(recipient) {
            bail!("slack chat.postMessage failed: channel_not_found");
        }
        state.sequence += 1;
        let ts = format!("1700000000.{:06}", state.sequence);
        let entry = (recipient.to_string(), message.clone());
        if direct {
            state.direct_messages.push(entry);
        } else {
            state.channel_messages.push(entry);
        }
        Ok(PostedMessage {
            channel: recipient.to_string(),
            ts,
        })
    }
}

#[async_trait]
impl ChatPlatform for RecordingChat {
    async fn send_direct_message(
        &self,
        user_id: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage> {
        self.record(user_id, message, true)
    }

    async fn send_channel_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<PostedMessage> {
        self.record(channel_id, message, false)
    }

    async fn send_ephemeral(
        &self,
        channel_id: &str,
        user_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<()> {
        self.lock().ephemerals.push(RecordedEphemeral {
            channel: channel_id.to_string(),
            user: user_id.to_string(),
            text: text.to_string(),
            thread_ts: thread_ts.map(str::to_string),
        });
        Ok(())
    }

    async fn respond(&self, response_url: &str, text: &str) -> Result<()> {
        self.lock()
            .responses
            .push((response_url.to_string(), text.to_string()));
        Ok(())
    }

    async fn user_profile(&self, user_id: &str) -> Result<ChatProfile> {
        match self.lock().profiles.get(user_id) {
            Some(profile) => Ok(profile.clone()),
            None => bail!("slack users.info failed: user_not_found"),
        }
    }

    async fn thread_root(
        &self,
        _channel_id: &str,
        _thread_ts: &str,
    ) -> Result<Option<ThreadMessage>> {
        Ok(self.lock().thread_root.clone())
    }
}
