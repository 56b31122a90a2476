//! Notification text for a [`ChangeEvent`].

use serde_json::Value;
use tidings_directory::IdentityLookup;

use crate::change_event::{ChangeEvent, EventItemType, EventPayload, FieldDiff};

const SKIPPED_FIELDS: &[&str] = &["finish_date"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub header: String,
    pub body: String,
}

impl RenderedNotification {
    /// Message text as delivered: header, then the body on following lines.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.header.clone()
        } else {
            format!("{}\n{}", self.header, self.body)
        }
    }
}

/// Formats a chat mention for a resolved user, or falls back to the plain name.
pub fn mention_or_name(identity: &dyn IdentityLookup, tracker_user_id: u64, name: &str) -> String {
    match identity.chat_user_for_tracker(tracker_user_id) {
        Some(chat_user_id) => format!("<@{chat_user_id}>"),
        None => name.to_string(),
    }
}

pub fn render(event: &ChangeEvent, identity: &dyn IdentityLookup) -> RenderedNotification {
    RenderedNotification {
        header: render_header(event, identity),
        body: render_body(event, identity),
    }
}

fn render_header(event: &ChangeEvent, identity: &dyn IdentityLookup) -> String {
    let actor = mention_or_name(
        identity,
        event.actor.tracker_user_id,
        &event.actor.full_name,
    );
    let mut header = format!(
        "{} {} by {}: {}",
        capitalize(event.item_type.display_noun()),
        event.action().past_tense(),
        actor,
        event.item.subject
    );
    if event.item_type == EventItemType::Task {
        if let Some(parent) = event.item.parent_story_subject.as_deref() {
            header.push_str(&format!(" ({parent})"));
        }
    }
    header
}

fn render_body(event: &ChangeEvent, identity: &dyn IdentityLookup) -> String {
    match &event.payload {
        EventPayload::Created => event
            .item
            .assigned_to
            .as_ref()
            .map(|assignee| {
                format!(
                    "Assigned to: {}",
                    mention_or_name(identity, assignee.tracker_user_id, &assignee.full_name)
                )
            })
            .unwrap_or_default(),
        EventPayload::Commented { comment } => format!("Comment: {comment}"),
        EventPayload::Changed { diff } => render_diff(diff),
        EventPayload::Deleted => String::new(),
    }
}

fn render_diff(diff: &[FieldDiff]) -> String {
    if diff
        .iter()
        .any(|entry| entry.field == "is_closed" && entry.to == Value::Bool(true))
    {
        return "Closed".to_string();
    }
    diff.iter()
        .filter(|entry| !is_noise_field(&entry.field))
        .map(|entry| {
            if is_empty_value(&entry.from) {
                format!("{} to: {}", entry.field, display_value(&entry.to))
            } else {
                format!(
                    "{} from: {} to: {}",
                    entry.field,
                    display_value(&entry.from),
                    display_value(&entry.to)
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Completion dates and ordering fields change on every drag in the board.
fn is_noise_field(field: &str) -> bool {
    SKIPPED_FIELDS.contains(&field) || field.contains("order")
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
