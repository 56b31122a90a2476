//! "Watch" button handling: add the clicking chat user as a tracker watcher.

use anyhow::Result;
use tidings_directory::IdentityResolver;
use tidings_tracker::{add_watcher, ItemKind, ItemRef, MutationError, TrackerClient};
use tracing::{info, warn};

use crate::chat_platform::ChatPlatform;
use crate::message_blocks::WatchTarget;

const UNKNOWN_USER_MESSAGE: &str = "Sorry, I can't watch this item for you as I don't know who you are in Taiga\nIf you think this is an error please reach out to #it.";
const UNAVAILABLE_MESSAGE: &str =
    "Sorry, I'm having trouble accessing Taiga right now. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub chat_user_id: String,
    pub channel_id: String,
    pub target: WatchTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The chat user has no linked tracker account.
    UnknownUser,
    AlreadyWatching,
    Watching,
    /// The tracker read or write failed, including version conflicts.
    Unavailable,
}

impl WatchOutcome {
    pub fn reply(self, target: &WatchTarget) -> String {
        match self {
            Self::UnknownUser => with_permalink(UNKNOWN_USER_MESSAGE, target),
            Self::Unavailable => with_permalink(UNAVAILABLE_MESSAGE, target),
            Self::AlreadyWatching => {
                format!("You're already watching this {} in Taiga!", target.item_type)
            }
            Self::Watching => format!("You're now watching this {} in Taiga!", target.item_type),
        }
    }
}

fn with_permalink(message: &str, target: &WatchTarget) -> String {
    if target.permalink.trim().is_empty() {
        return message.to_string();
    }
    format!(
        "{message}\n\nYou can view the item yourself <{}|here>",
        target.permalink
    )
}

/// Button values from older messages may carry any type name; stories are the default.
fn target_item(target: &WatchTarget) -> ItemRef {
    let kind = ItemKind::from_wire_name(&target.item_type).unwrap_or(ItemKind::Story);
    ItemRef::new(kind, target.item_id)
}

pub async fn watch_outcome(
    tracker: &dyn TrackerClient,
    identity: &IdentityResolver,
    request: &WatchRequest,
) -> WatchOutcome {
    let Some(tracker_user_id) = identity
        .resolve_chat_to_tracker(&request.chat_user_id)
        .await
    else {
        info!(
            chat_user = %request.chat_user_id,
            gap = ?identity.snapshot().identity_gap(&request.chat_user_id),
            "watch request from unmapped chat user"
        );
        return WatchOutcome::UnknownUser;
    };

    let item = target_item(&request.target);
    match add_watcher(tracker, item, tracker_user_id).await {
        Ok(_) => WatchOutcome::Watching,
        Err(MutationError::AlreadyWatching { .. }) => WatchOutcome::AlreadyWatching,
        Err(error) => {
            warn!(
                project_id = request.target.project_id,
                item_id = item.id,
                conflict = error.is_conflict(),
                error = %error,
                "watch request failed"
            );
            WatchOutcome::Unavailable
        }
    }
}

/// Runs the watch flow and tells the user the result in an ephemeral message.
pub async fn handle_watch(
    chat: &dyn ChatPlatform,
    tracker: &dyn TrackerClient,
    identity: &IdentityResolver,
    request: &WatchRequest,
) -> Result<WatchOutcome> {
    let outcome = watch_outcome(tracker, identity, request).await;
    chat.send_ephemeral(
        &request.channel_id,
        &request.chat_user_id,
        &outcome.reply(&request.target),
        None,
    )
    .await?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tidings_directory::in_memory::StaticDirectory;
    use tidings_directory::{IdentityResolver, IdentityResolverConfig};
    use tidings_tracker::in_memory::{InMemoryTracker, SAMPLE_STORY_ID};
    use tidings_tracker::{ItemKind, ItemRef};

    use super::{handle_watch, WatchOutcome, WatchRequest};
    use crate::in_memory::RecordingChat;
    use crate::message_blocks::WatchTarget;

    fn request(chat_user_id: &str) -> WatchRequest {
        WatchRequest {
            chat_user_id: chat_user_id.to_string(),
            channel_id: "C100".to_string(),
            target: WatchTarget {
                project_id: 1,
                item_id: SAMPLE_STORY_ID,
                item_type: "userstory".to_string(),
                permalink: "https://tasks.example.org/project/infra/us/12".to_string(),
            },
        }
    }

    async fn resolver(tracker: Arc<InMemoryTracker>) -> IdentityResolver {
        IdentityResolver::load(
            StaticDirectory::with(vec![StaticDirectory::member(
                1,
                "sam@example.org",
                "U009",
            )]),
            tracker,
            IdentityResolverConfig::default(),
        )
        .await
        .expect("resolver")
    }

    #[tokio::test]
    async fn functional_watch_adds_watcher_then_reports_already_watching() {
        let tracker = Arc::new(InMemoryTracker::sample());
        let identity = resolver(tracker.clone()).await;
        let chat = RecordingChat::default();

        let first = handle_watch(&chat, tracker.as_ref(), &identity, &request("U009"))
            .await
            .expect("watch");
        assert_eq!(first, WatchOutcome::Watching);
        let story = tracker
            .item(ItemRef::new(ItemKind::Story, SAMPLE_STORY_ID))
            .expect("story");
        assert!(story.watchers.contains(&9));

        let second = handle_watch(&chat, tracker.as_ref(), &identity, &request("U009"))
            .await
            .expect("watch");
        assert_eq!(second, WatchOutcome::AlreadyWatching);

        let ephemerals = chat.ephemerals();
        assert_eq!(ephemerals.len(), 2);
        assert_eq!(ephemerals[0].channel, "C100");
        assert_eq!(ephemerals[0].user, "U009");
        assert_eq!(
            ephemerals[0].text,
            "You're now watching this userstory in Taiga!"
        );
        assert_eq!(
            ephemerals[1].text,
            "You're already watching this userstory in Taiga!"
        );
    }

    #[tokio::test]
    async fn regression_unknown_chat_user_gets_guidance_without_tracker_write() {
        let tracker = Arc::new(InMemoryTracker::sample());
        let identity = resolver(tracker.clone()).await;
        let chat = RecordingChat::default();

        let outcome = handle_watch(&chat, tracker.as_ref(), &identity, &request("U404"))
            .await
            .expect("watch");
        assert_eq!(outcome, WatchOutcome::UnknownUser);
        assert_eq!(tracker.write_count(), 0);
        let text = &chat.ephemerals()[0].text;
        assert!(text.starts_with("Sorry, I can't watch this item for you"));
        assert!(text.ends_with("<https://tasks.example.org/project/infra/us/12|here>"));
    }

    #[tokio::test]
    async fn regression_concurrent_edit_reports_trouble_accessing_tracker() {
        let tracker = Arc::new(InMemoryTracker::sample());
        let identity = resolver(tracker.clone()).await;
        let chat = RecordingChat::default();
        tracker.write_after_next_read(ItemRef::new(ItemKind::Story, SAMPLE_STORY_ID));

        let outcome = handle_watch(&chat, tracker.as_ref(), &identity, &request("U009"))
            .await
            .expect("watch");
        assert_eq!(outcome, WatchOutcome::Unavailable);
        assert!(chat.ephemerals()[0]
            .text
            .starts_with("Sorry, I'm having trouble accessing Taiga right now."));
    }

    #[test]
    fn unit_blank_permalink_is_not_linked() {
        let mut target = request("U1").target;
        target.permalink = String::new();
        assert_eq!(
            WatchOutcome::Unavailable.reply(&target),
            "Sorry, I'm having trouble accessing Taiga right now. Please try again later."
        );
    }
}
