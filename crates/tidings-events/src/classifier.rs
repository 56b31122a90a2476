//! Decides whether an event is worth a notification and who receives it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tidings_directory::IdentityLookup;

use crate::change_event::{Actor, ChangeEvent, EventAction, EventItemType};

pub const IMPORTANT_TAG: &str = "important";
const DEFAULT_AUTOMATION_NAME: &str = "Giant Robot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The tracker account the bridge itself acts as.
pub struct AutomationAccount {
    #[serde(default)]
    pub tracker_user_id: Option<u64>,
    #[serde(default = "default_automation_name")]
    pub full_name: String,
}

fn default_automation_name() -> String {
    DEFAULT_AUTOMATION_NAME.to_string()
}

impl Default for AutomationAccount {
    fn default() -> Self {
        Self {
            tracker_user_id: None,
            full_name: default_automation_name(),
        }
    }
}

impl AutomationAccount {
    pub fn matches(&self, actor: &Actor) -> bool {
        match self.tracker_user_id {
            Some(id) => id == actor.tracker_user_id,
            None => actor.full_name.trim() == self.full_name.trim(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Tracker project ID → chat channel ID.
    #[serde(default)]
    pub project_channels: BTreeMap<u64, String>,
    #[serde(default)]
    pub automation: AutomationAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trigger {
    New,
    Important,
    Watched,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientSet {
    /// Tracker user IDs; resolved to chat users at send time.
    pub individuals: BTreeSet<u64>,
    pub channels: BTreeSet<String>,
}

impl RecipientSet {
    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty() && self.channels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Who the notification appears to come from.
pub enum SenderIdentity {
    /// The bot's own name and icon.
    Neutral,
    /// A human tracker user. The chat profile, when resolvable, replaces the
    /// tracker name and photo.
    Actor {
        display_name: String,
        avatar_url: Option<String>,
        chat_user_id: Option<String>,
    },
    /// The chat user who asked the bridge to create the item.
    Requester { chat_user_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub triggers: Vec<Trigger>,
    pub recipients: RecipientSet,
    pub sender: SenderIdentity,
}

impl Classification {
    pub fn is_noop(&self) -> bool {
        self.triggers.is_empty()
    }
}

fn requester_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Added to Taiga by: .* \((\w+)\)").ok())
        .as_ref()
}

/// Chat user ID recorded in descriptions of items created from chat.
pub fn requester_chat_id(description: &str) -> Option<String> {
    requester_pattern()?
        .captures(description)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string())
}

pub fn sender_identity(
    event: &ChangeEvent,
    automation: &AutomationAccount,
    identity: &dyn IdentityLookup,
) -> SenderIdentity {
    if automation.matches(&event.actor) {
        return event
            .item
            .description
            .as_deref()
            .and_then(requester_chat_id)
            .map(|chat_user_id| SenderIdentity::Requester { chat_user_id })
            .unwrap_or(SenderIdentity::Neutral);
    }
    SenderIdentity::Actor {
        display_name: format!("{} | Taiga", event.actor.first_name()),
        avatar_url: event.actor.photo.clone(),
        chat_user_id: identity.chat_user_for_tracker(event.actor.tracker_user_id),
    }
}

pub fn classify(
    event: &ChangeEvent,
    config: &ClassifierConfig,
    identity: &dyn IdentityLookup,
) -> Classification {
    let sender = sender_identity(event, &config.automation, identity);
    let mut triggers = Vec::new();
    let mut recipients = RecipientSet::default();
    let action = event.action();
    let channel = config.project_channels.get(&event.project_id);
    let assignee = event
        .item
        .assigned_to
        .as_ref()
        .map(|assignee| assignee.tracker_user_id);
    let actor_id = event.actor.tracker_user_id;

    if action == EventAction::Delete {
        tracing::debug!(
            project_id = event.project_id,
            item_id = event.item.id,
            "delete events are not notified"
        );
        return Classification {
            triggers,
            recipients,
            sender,
        };
    }

    if action == EventAction::Create {
        let honoured = event.item_type != EventItemType::Issue
            || config.automation.matches(&event.actor);
        if !honoured {
            tracing::debug!(
                item_id = event.item.id,
                "issue created directly in the tracker; not announcing"
            );
            return Classification {
                triggers,
                recipients,
                sender,
            };
        }
        triggers.push(Trigger::New);
        recipients.individuals.extend(assignee);
        if event.item_type != EventItemType::Task {
            recipients.channels.extend(channel.cloned());
        }
    }

    if event.has_tag(IMPORTANT_TAG) {
        triggers.push(Trigger::Important);
        match channel {
            Some(channel) => {
                recipients.channels.insert(channel.clone());
            }
            None => tracing::error!(
                project_id = event.project_id,
                item_id = event.item.id,
                "item tagged important but project has no mapped channel"
            ),
        }
    }

    if matches!(action, EventAction::Change | EventAction::Comment) {
        let mut watchers = event.item.watchers.iter().copied().collect::<BTreeSet<_>>();
        watchers.extend(assignee);
        watchers.remove(&actor_id);
        if !watchers.is_empty() {
            triggers.push(Trigger::Watched);
            recipients.individuals.extend(watchers);
        }
    }

    recipients.individuals.remove(&actor_id);
    tracing::info!(
        project_id = event.project_id,
        item_id = event.item.id,
        triggers = ?triggers,
        individuals = recipients.individuals.len(),
        channels = recipients.channels.len(),
        "event classified"
    );
    Classification {
        triggers,
        recipients,
        sender,
    }
}
