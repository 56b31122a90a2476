//! Typed view of one tracker webhook delivery.
//!
//! The raw body is parsed exactly once into a [`ChangeEvent`]; everything
//! downstream matches on the typed payload instead of probing JSON.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tidings_tracker::{ItemKind, ItemRef};

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported webhook action '{0}'")]
    UnsupportedAction(String),
    #[error("unsupported webhook item type '{0}'")]
    UnsupportedType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    Create,
    Change,
    Delete,
    Comment,
}

impl EventAction {
    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Change => "changed",
            Self::Delete => "deleted",
            Self::Comment => "commented",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventItemType {
    Story,
    Task,
    Issue,
    Epic,
}

impl EventItemType {
    pub fn from_wire_name(raw: &str) -> Option<Self> {
        match raw {
            "userstory" => Some(Self::Story),
            "task" => Some(Self::Task),
            "issue" => Some(Self::Issue),
            "epic" => Some(Self::Epic),
            _ => None,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Story => "userstory",
            Self::Task => "task",
            Self::Issue => "issue",
            Self::Epic => "epic",
        }
    }

    /// Noun used in notification text.
    pub fn display_noun(self) -> &'static str {
        match self {
            Self::Story => "card",
            Self::Task => "task",
            Self::Issue => "issue",
            Self::Epic => "epic",
        }
    }

    /// Epics carry no workflow the bridge can mutate.
    pub fn item_kind(self) -> Option<ItemKind> {
        match self {
            Self::Story => Some(ItemKind::Story),
            Self::Task => Some(ItemKind::Task),
            Self::Issue => Some(ItemKind::Issue),
            Self::Epic => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub tracker_user_id: u64,
    pub full_name: String,
    pub photo: Option<String>,
}

impl Actor {
    pub fn first_name(&self) -> &str {
        self.full_name
            .split_whitespace()
            .next()
            .unwrap_or(self.full_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignee {
    pub tracker_user_id: u64,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemSnapshot {
    pub id: u64,
    pub subject: String,
    pub tags: Vec<String>,
    pub assigned_to: Option<Assignee>,
    pub watchers: Vec<u64>,
    pub description: Option<String>,
    pub permalink: Option<String>,
    pub parent_story_subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

impl FieldDiff {
    /// Most entries are `{from, to}` objects; anything else is kept whole as
    /// the new value.
    fn from_wire(field: String, raw: Value) -> Self {
        match raw {
            Value::Object(mut values) if values.contains_key("to") || values.contains_key("from") => {
                Self {
                    field,
                    from: values.remove("from").unwrap_or(Value::Null),
                    to: values.remove("to").unwrap_or(Value::Null),
                }
            }
            other => Self {
                field,
                from: Value::Null,
                to: other,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Created,
    /// Field changes in the order the tracker sent them.
    Changed { diff: Vec<FieldDiff> },
    Commented { comment: String },
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub item_type: EventItemType,
    pub project_id: u64,
    pub actor: Actor,
    pub item: ItemSnapshot,
    pub payload: EventPayload,
}

impl ChangeEvent {
    pub fn parse(body: &[u8]) -> Result<Self, EventParseError> {
        let raw = serde_json::from_slice::<RawWebhook>(body)?;
        Self::from_raw(raw)
    }

    pub fn action(&self) -> EventAction {
        match self.payload {
            EventPayload::Created => EventAction::Create,
            EventPayload::Changed { .. } => EventAction::Change,
            EventPayload::Commented { .. } => EventAction::Comment,
            EventPayload::Deleted => EventAction::Delete,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.item
            .tags
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(tag))
    }

    pub fn item_ref(&self) -> Option<ItemRef> {
        self.item_type
            .item_kind()
            .map(|kind| ItemRef::new(kind, self.item.id))
    }

    fn from_raw(raw: RawWebhook) -> Result<Self, EventParseError> {
        let item_type = EventItemType::from_wire_name(raw.item_type.trim())
            .ok_or_else(|| EventParseError::UnsupportedType(raw.item_type.clone()))?;
        let change = raw.change.unwrap_or_default();
        let comment = change
            .comment
            .map(|comment| comment.trim().to_string())
            .filter(|comment| !comment.is_empty());
        let payload = match raw.action.trim() {
            "create" => EventPayload::Created,
            "delete" => EventPayload::Deleted,
            "change" => match comment {
                Some(comment) => EventPayload::Commented { comment },
                None => EventPayload::Changed {
                    diff: change
                        .diff
                        .into_iter()
                        .map(|(field, values)| FieldDiff::from_wire(field, values))
                        .collect(),
                },
            },
            other => return Err(EventParseError::UnsupportedAction(other.to_string())),
        };

        let data = raw.data;
        Ok(Self {
            item_type,
            project_id: data.project.id,
            actor: Actor {
                tracker_user_id: raw.by.id,
                full_name: raw.by.full_name,
                photo: raw.by.photo.filter(|photo| !photo.trim().is_empty()),
            },
            item: ItemSnapshot {
                id: data.id,
                subject: data.subject,
                tags: data.tags.iter().filter_map(tag_name).collect(),
                assigned_to: data.assigned_to.map(|user| Assignee {
                    tracker_user_id: user.id,
                    full_name: user.full_name,
                }),
                watchers: data.watchers,
                description: data.description,
                permalink: data.permalink.filter(|link| !link.trim().is_empty()),
                parent_story_subject: data
                    .user_story
                    .map(|story| story.subject)
                    .filter(|subject| !subject.trim().is_empty()),
            },
            payload,
        })
    }
}

/// Tags arrive either as plain strings or as `[name, colour]` pairs.
fn tag_name(raw: &Value) -> Option<String> {
    match raw {
        Value::String(name) => Some(name.clone()),
        Value::Array(parts) => parts.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawWebhook {
    action: String,
    #[serde(rename = "type")]
    item_type: String,
    by: RawActor,
    data: RawItem,
    #[serde(default)]
    change: Option<RawChange>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    id: u64,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    photo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProjectRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawUserRef {
    id: u64,
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct RawStoryRef {
    #[serde(default)]
    subject: String,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: u64,
    project: RawProjectRef,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    tags: Vec<Value>,
    #[serde(default)]
    assigned_to: Option<RawUserRef>,
    #[serde(default)]
    watchers: Vec<u64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    user_story: Option<RawStoryRef>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChange {
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    diff: IndexMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{ChangeEvent, EventAction, EventItemType, EventParseError, EventPayload};

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).expect("encode")
    }

    fn change_body(change: Value) -> Vec<u8> {
        body(json!({
            "action": "change",
            "type": "userstory",
            "by": {"id": 5, "full_name": "Jo Volunteer", "photo": "https://img/jo.png"},
            "data": {
                "id": 99,
                "project": {"id": 3},
                "subject": "Fix the laser",
                "tags": ["important", ["electrical", "#f00"]],
                "watchers": [1, 2],
                "assigned_to": {"id": 2, "full_name": "Alex Member"},
                "permalink": "https://tracker/project/lasers/us/12"
            },
            "change": change
        }))
    }

    #[test]
    fn unit_change_with_comment_becomes_comment_action() {
        let event = ChangeEvent::parse(&change_body(json!({
            "comment": "Ordered a new tube",
            "diff": {"status": {"from": "New", "to": "Ready"}}
        })))
        .expect("event");
        assert_eq!(event.action(), EventAction::Comment);
        assert_eq!(
            event.payload,
            EventPayload::Commented {
                comment: "Ordered a new tube".to_string()
            }
        );
    }

    #[test]
    fn unit_change_preserves_diff_order_from_the_wire() {
        let raw = br#"{
            "action": "change",
            "type": "task",
            "by": {"id": 5, "full_name": "Jo"},
            "data": {"id": 1, "project": {"id": 3}, "user_story": {"subject": "Parent"}},
            "change": {"comment": "", "diff": {"subject": {"from": "a", "to": "b"}, "assigned_to": {"to": "Sam"}}}
        }"#;
        let event = ChangeEvent::parse(raw).expect("event");
        let EventPayload::Changed { diff } = &event.payload else {
            panic!("expected change payload");
        };
        let fields = diff.iter().map(|entry| entry.field.as_str()).collect::<Vec<_>>();
        assert_eq!(fields, vec!["subject", "assigned_to"]);
        assert_eq!(diff[1].from, Value::Null);
        assert_eq!(event.item.parent_story_subject.as_deref(), Some("Parent"));
        assert_eq!(event.item_type, EventItemType::Task);
    }

    #[test]
    fn unit_tags_accept_strings_and_pairs() {
        let event = ChangeEvent::parse(&change_body(json!({"diff": {}}))).expect("event");
        assert_eq!(event.item.tags, vec!["important", "electrical"]);
        assert!(event.has_tag("IMPORTANT"));
        assert_eq!(event.actor.first_name(), "Jo");
    }

    #[test]
    fn regression_unknown_type_and_action_are_rejected() {
        let milestone = body(json!({
            "action": "create",
            "type": "milestone",
            "by": {"id": 1, "full_name": "Jo"},
            "data": {"id": 1, "project": {"id": 1}}
        }));
        assert!(matches!(
            ChangeEvent::parse(&milestone),
            Err(EventParseError::UnsupportedType(kind)) if kind == "milestone"
        ));

        let test_ping = body(json!({
            "action": "test",
            "type": "userstory",
            "by": {"id": 1, "full_name": "Jo"},
            "data": {"id": 1, "project": {"id": 1}}
        }));
        assert!(matches!(
            ChangeEvent::parse(&test_ping),
            Err(EventParseError::UnsupportedAction(_))
        ));
        assert!(matches!(
            ChangeEvent::parse(b"not json"),
            Err(EventParseError::Malformed(_))
        ));
    }

    #[test]
    fn unit_epic_has_no_mutable_item_ref() {
        let epic = body(json!({
            "action": "delete",
            "type": "epic",
            "by": {"id": 1, "full_name": "Jo"},
            "data": {"id": 8, "project": {"id": 1}}
        }));
        let event = ChangeEvent::parse(&epic).expect("event");
        assert_eq!(event.action(), EventAction::Delete);
        assert_eq!(event.item_ref(), None);
    }
}
