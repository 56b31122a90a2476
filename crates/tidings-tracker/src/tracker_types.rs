//! Wire types for the tracker REST API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Tracker item kinds that carry a workflow status and a version token.
pub enum ItemKind {
    Story,
    Task,
    Issue,
}

impl ItemKind {
    pub const ALL: [ItemKind; 3] = [ItemKind::Story, ItemKind::Task, ItemKind::Issue];

    /// Name used by webhook payloads and interactive button values.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Story => "userstory",
            Self::Task => "task",
            Self::Issue => "issue",
        }
    }

    pub fn from_wire_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "userstory" | "story" | "us" => Some(Self::Story),
            "task" => Some(Self::Task),
            "issue" => Some(Self::Issue),
            _ => None,
        }
    }

    /// REST collection segment, e.g. `/userstories/{id}`.
    pub fn api_collection(self) -> &'static str {
        match self {
            Self::Story => "userstories",
            Self::Task => "tasks",
            Self::Issue => "issues",
        }
    }

    pub fn status_collection(self) -> &'static str {
        match self {
            Self::Story => "userstory-statuses",
            Self::Task => "task-statuses",
            Self::Issue => "issue-statuses",
        }
    }

    /// Path segment used by the tracker web UI permalinks.
    pub fn permalink_segment(self) -> &'static str {
        match self {
            Self::Story => "us",
            Self::Task => "task",
            Self::Issue => "issue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Identifies one versioned tracker item.
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: u64,
}

impl ItemRef {
    pub fn new(kind: ItemKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.kind.wire_name(), self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerProject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub members: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerUser {
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name_display: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl TrackerUser {
    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(|email| email.trim().to_ascii_lowercase())
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
/// Status, severity or issue-type row from a bulk listing endpoint.
pub struct CatalogRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub order: i64,
    pub project: u64,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrackerItem {
    pub id: u64,
    #[serde(rename = "ref", default)]
    pub reference: Option<u64>,
    pub project: u64,
    #[serde(default)]
    pub status: Option<u64>,
    pub version: u64,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub watchers: Vec<u64>,
    #[serde(default)]
    pub assigned_to: Option<u64>,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
/// Custom attribute document of a story; versioned separately from the story.
pub struct CustomAttributeValues {
    #[serde(default)]
    pub attributes_values: Map<String, Value>,
    #[serde(default)]
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
/// Issue creation request. Optional IDs are omitted rather than sent as null.
pub struct NewIssue {
    pub project: u64,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<u64>,
    pub tags: Vec<String>,
}
