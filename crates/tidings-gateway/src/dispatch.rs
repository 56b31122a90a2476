//! Classification, rendering and fan-out for one tracker event.

use std::collections::BTreeSet;
use std::sync::Arc;

use tidings_directory::IdentityResolver;
use tidings_events::{
    classify, render, ChangeEvent, ClassifierConfig, RecipientSet, SenderIdentity,
};
use tidings_slack::{notification_blocks, ChatPlatform, OutgoingMessage, WatchTarget};
use tracing::{debug, info, warn};

const SENDER_SUFFIX: &str = " | Taiga";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub direct_messages: usize,
    pub channel_messages: usize,
    /// Tracker users with no linked chat account.
    pub unresolved_recipients: usize,
    pub failed_sends: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    NoAction,
    Actioned(DispatchReport),
}

pub struct NotificationBridge {
    chat: Arc<dyn ChatPlatform>,
    identity: Arc<IdentityResolver>,
    classifier: ClassifierConfig,
}

impl NotificationBridge {
    pub fn new(
        chat: Arc<dyn ChatPlatform>,
        identity: Arc<IdentityResolver>,
        classifier: ClassifierConfig,
    ) -> Self {
        Self {
            chat,
            identity,
            classifier,
        }
    }

    pub async fn process(&self, event: &ChangeEvent) -> EventOutcome {
        if let Err(error) = self.identity.refresh_if_stale().await {
            warn!(error = %error, "identity refresh failed; using previous snapshot");
        }

        let classification = classify(event, &self.classifier, self.identity.as_ref());
        if classification.is_noop() {
            debug!(
                project_id = event.project_id,
                item_id = event.item.id,
                action = ?event.action(),
                "no notification trigger"
            );
            return EventOutcome::NoAction;
        }
        info!(
            project_id = event.project_id,
            item_id = event.item.id,
            triggers = ?classification.triggers,
            individuals = classification.recipients.individuals.len(),
            channels = classification.recipients.channels.len(),
            "notifying"
        );

        let message = self.build_message(event, &classification.sender).await;
        let report = dispatch(
            self.chat.as_ref(),
            self.identity.as_ref(),
            &classification.recipients,
            &message,
        )
        .await;
        EventOutcome::Actioned(report)
    }

    async fn build_message(&self, event: &ChangeEvent, sender: &SenderIdentity) -> OutgoingMessage {
        let text = render(event, self.identity.as_ref()).text();
        let permalink = event.item.permalink.as_deref();
        let watch = match (permalink, event.item_type.item_kind()) {
            (Some(permalink), Some(_)) => Some(WatchTarget {
                project_id: event.project_id,
                item_id: event.item.id,
                item_type: event.item_type.wire_name().to_string(),
                permalink: permalink.to_string(),
            }),
            _ => None,
        };
        let (username, icon_url) = self.sender_override(sender).await;
        OutgoingMessage {
            blocks: notification_blocks(&text, permalink, watch.as_ref()),
            text,
            username,
            icon_url,
            thread_ts: None,
        }
    }

    /// Username and avatar to post under; `None` keeps the bot's own.
    async fn sender_override(&self, sender: &SenderIdentity) -> (Option<String>, Option<String>) {
        match sender {
            SenderIdentity::Neutral => (None, None),
            SenderIdentity::Actor {
                display_name,
                avatar_url,
                chat_user_id,
            } => {
                let fallback = (Some(display_name.clone()), avatar_url.clone());
                let Some(chat_user_id) = chat_user_id else {
                    return fallback;
                };
                match self.chat.user_profile(chat_user_id).await {
                    Ok(profile) => (
                        Some(format!("{}{SENDER_SUFFIX}", profile.short_name())),
                        profile.image_72.or_else(|| avatar_url.clone()),
                    ),
                    Err(error) => {
                        warn!(chat_user = %chat_user_id, error = %error, "actor profile lookup failed");
                        fallback
                    }
                }
            }
            SenderIdentity::Requester { chat_user_id } => {
                match self.chat.user_profile(chat_user_id).await {
                    Ok(profile) => (
                        Some(format!("{}{SENDER_SUFFIX}", profile.short_name())),
                        profile.image_72,
                    ),
                    Err(error) => {
                        warn!(chat_user = %chat_user_id, error = %error, "requester profile lookup failed");
                        (None, None)
                    }
                }
            }
        }
    }
}

/// Sends `message` to every recipient: direct messages first, then channels.
/// A failed send is logged and the rest still go out.
pub async fn dispatch(
    chat: &dyn ChatPlatform,
    identity: &IdentityResolver,
    recipients: &RecipientSet,
    message: &OutgoingMessage,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    let mut chat_users = BTreeSet::new();
    for tracker_user_id in &recipients.individuals {
        match identity.resolve_tracker_to_chat(*tracker_user_id).await {
            Some(chat_user_id) => {
                chat_users.insert(chat_user_id);
            }
            None => {
                report.unresolved_recipients += 1;
                info!(tracker_user_id, "recipient has no linked chat account; skipping");
            }
        }
    }

    for chat_user_id in &chat_users {
        match chat.send_direct_message(chat_user_id, message).await {
            Ok(_) => report.direct_messages += 1,
            Err(error) => {
                report.failed_sends += 1;
                warn!(chat_user = %chat_user_id, error = %error, "direct message failed");
            }
        }
    }

    for channel_id in &recipients.channels {
        match chat.send_channel_message(channel_id, message).await {
            Ok(_) => report.channel_messages += 1,
            Err(error) => {
                report.failed_sends += 1;
                warn!(channel = %channel_id, error = %error, "channel message failed");
            }
        }
    }

    report
}
