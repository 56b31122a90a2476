//! In-memory [`TrackerClient`] used by tests across the workspace.
//!
//! Writes enforce the version check the real tracker applies: a patch carrying
//! anything other than the stored version is rejected with a 400 naming the
//! version, and a successful patch bumps the version by one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tracker_client::TrackerClient;
use crate::tracker_error::TrackerError;
use crate::tracker_types::{
    CatalogRecord, CustomAttributeValues, ItemKind, ItemRef, NewIssue, TrackerItem,
    TrackerProject, TrackerUser,
};

pub const SAMPLE_STORY_ID: u64 = 1_000;
pub const SAMPLE_TASK_ID: u64 = 2_000;
pub const SAMPLE_ISSUE_ID: u64 = 3_000;

const STALE_VERSION_BODY: &str =
    r#"{"version": "The version doesn't match with the current one"}"#;

#[derive(Default)]
struct InMemoryState {
    projects: Vec<TrackerProject>,
    users: BTreeMap<u64, TrackerUser>,
    statuses: BTreeMap<ItemKind, Vec<CatalogRecord>>,
    severities: Vec<CatalogRecord>,
    issue_types: Vec<CatalogRecord>,
    items: BTreeMap<ItemRef, TrackerItem>,
    custom_attributes: BTreeMap<u64, CustomAttributeValues>,
    comments: Vec<(ItemRef, String)>,
    created_issues: Vec<NewIssue>,
    failing_listings: BTreeSet<String>,
    write_after_next_read: BTreeSet<ItemRef>,
    writes: usize,
    next_issue_id: u64,
}

#[derive(Default)]
pub struct InMemoryTracker {
    state: Mutex<InMemoryState>,
}

fn catalog(base: u64, project: u64, rows: &[(&str, i64, bool)]) -> Vec<CatalogRecord> {
    rows.iter()
        .enumerate()
        .map(|(index, (name, order, is_closed))| CatalogRecord {
            id: base + (project - 1) * 10 + index as u64 + 1,
            name: (*name).to_string(),
            order: *order,
            project,
            is_closed: *is_closed,
        })
        .collect()
}

fn user(id: u64, username: &str, full_name: &str, email: Option<&str>) -> TrackerUser {
    TrackerUser {
        id,
        username: username.to_string(),
        full_name_display: full_name.to_string(),
        email: email.map(str::to_string),
    }
}

impl InMemoryTracker {
    /// Three projects (`Infrastructure`, `Lasers`, `3D`), three users and one
    /// story, task and issue in `Infrastructure`.
    ///
    /// Catalog IDs follow `base + (project - 1) * 10 + position`, so the
    /// `Infrastructure` story statuses are 101 (New), 102 (In progress) and
    /// 103 (Done); task statuses start at 201, issue statuses at 301,
    /// severities at 501 (Critical, Normal, Minor) and types at 601 (Bug,
    /// Question, Enhancement).
    pub fn sample() -> Self {
        let tracker = Self::default();
        {
            let mut state = tracker.lock();
            state.projects = vec![
                TrackerProject {
                    id: 1,
                    name: "Infrastructure".to_string(),
                    slug: "infrastructure".to_string(),
                    members: vec![42, 7, 9],
                },
                TrackerProject {
                    id: 2,
                    name: "Lasers".to_string(),
                    slug: "lasers".to_string(),
                    members: vec![42],
                },
                TrackerProject {
                    id: 3,
                    name: "3D".to_string(),
                    slug: "3d".to_string(),
                    members: vec![9],
                },
            ];
            for entry in [
                user(42, "alex", "Alex Member", Some("alex@example.org")),
                user(7, "robot", "Giant Robot", Some("robot@example.org")),
                user(9, "sam", "Sam Example", Some("Sam@Example.org")),
            ] {
                state.users.insert(entry.id, entry);
            }

            let workflow = [
                ("New", 1, false),
                ("In progress", 2, false),
                ("Done", 3, true),
            ];
            for (kind, base) in [
                (ItemKind::Story, 100),
                (ItemKind::Task, 200),
                (ItemKind::Issue, 300),
            ] {
                let rows = (1..=3)
                    .flat_map(|project| catalog(base, project, &workflow))
                    .collect();
                state.statuses.insert(kind, rows);
            }
            state.severities = (1..=3)
                .flat_map(|project| {
                    catalog(
                        500,
                        project,
                        &[("Critical", 3, false), ("Normal", 2, false), ("Minor", 1, false)],
                    )
                })
                .collect();
            state.issue_types = (1..=3)
                .flat_map(|project| {
                    catalog(
                        600,
                        project,
                        &[("Bug", 1, false), ("Question", 2, false), ("Enhancement", 3, false)],
                    )
                })
                .collect();

            for (kind, id, status, version) in [
                (ItemKind::Story, SAMPLE_STORY_ID, 101, 7),
                (ItemKind::Task, SAMPLE_TASK_ID, 201, 3),
                (ItemKind::Issue, SAMPLE_ISSUE_ID, 301, 1),
            ] {
                state.items.insert(
                    ItemRef::new(kind, id),
                    TrackerItem {
                        id,
                        reference: Some(id / 10),
                        project: 1,
                        status: Some(status),
                        version,
                        subject: format!("Sample {}", kind.wire_name()),
                        watchers: Vec::new(),
                        assigned_to: None,
                        is_closed: false,
                    },
                );
            }
            state.custom_attributes.insert(
                SAMPLE_STORY_ID,
                CustomAttributeValues {
                    attributes_values: Map::new(),
                    version: 2,
                },
            );
            state.next_issue_id = 5_000;
        }
        tracker
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_item(&self, kind: ItemKind, item: TrackerItem) {
        self.lock().items.insert(ItemRef::new(kind, item.id), item);
    }

    pub fn add_project(&self, project: TrackerProject) {
        self.lock().projects.push(project);
    }

    pub fn item(&self, item: ItemRef) -> Option<TrackerItem> {
        self.lock().items.get(&item).cloned()
    }

    pub fn custom_attributes(&self, story_id: u64) -> Option<CustomAttributeValues> {
        self.lock().custom_attributes.get(&story_id).cloned()
    }

    /// Makes the named listing (`projects`, `users`, `statuses`, `severities`,
    /// `issue-types`) fail with a 503 until cleared.
    pub fn fail_listing(&self, listing: &str) {
        self.lock().failing_listings.insert(listing.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing_listings.clear();
    }

    /// Simulates a concurrent editor: the next read of `item` returns the
    /// current document and then bumps the stored version.
    pub fn write_after_next_read(&self, item: ItemRef) {
        self.lock().write_after_next_read.insert(item);
    }

    /// Successful writes so far (patches and issue creations).
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn comments(&self) -> Vec<(ItemRef, String)> {
        self.lock().comments.clone()
    }

    pub fn created_issues(&self) -> Vec<NewIssue> {
        self.lock().created_issues.clone()
    }

    fn check_listing(&self, listing: &str) -> Result<(), TrackerError> {
        if self.lock().failing_listings.contains(listing) {
            return Err(TrackerError::Status {
                operation: format!("list {listing}"),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn stale_version(operation: String) -> TrackerError {
    TrackerError::Status {
        operation,
        status: 400,
        body: STALE_VERSION_BODY.to_string(),
    }
}

fn apply_item_changes(item: &mut TrackerItem, changes: &Map<String, Value>) {
    for (field, value) in changes {
        match field.as_str() {
            "status" => item.status = value.as_u64(),
            "assigned_to" => item.assigned_to = value.as_u64(),
            "subject" => {
                if let Some(subject) = value.as_str() {
                    item.subject = subject.to_string();
                }
            }
            "watchers" => {
                item.watchers = value
                    .as_array()
                    .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
                    .unwrap_or_default();
            }
            "is_closed" => item.is_closed = value.as_bool().unwrap_or(false),
            _ => {}
        }
    }
}

#[async_trait]
impl TrackerClient for InMemoryTracker {
    async fn list_projects(&self) -> Result<Vec<TrackerProject>, TrackerError> {
        self.check_listing("projects")?;
        Ok(self.lock().projects.clone())
    }

    async fn get_user(&self, user_id: u64) -> Result<TrackerUser, TrackerError> {
        self.check_listing("users")?;
        self.lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound {
                operation: "get user".to_string(),
                target: user_id.to_string(),
            })
    }

    async fn list_users(&self) -> Result<Vec<TrackerUser>, TrackerError> {
        self.check_listing("users")?;
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn list_statuses(&self, kind: ItemKind) -> Result<Vec<CatalogRecord>, TrackerError> {
        self.check_listing("statuses")?;
        Ok(self.lock().statuses.get(&kind).cloned().unwrap_or_default())
    }

    async fn list_severities(&self) -> Result<Vec<CatalogRecord>, TrackerError> {
        self.check_listing("severities")?;
        Ok(self.lock().severities.clone())
    }

    async fn list_issue_types(&self) -> Result<Vec<CatalogRecord>, TrackerError> {
        self.check_listing("issue-types")?;
        Ok(self.lock().issue_types.clone())
    }

    async fn get_item(&self, item: ItemRef) -> Result<TrackerItem, TrackerError> {
        let mut state = self.lock();
        let current = state
            .items
            .get(&item)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound {
                operation: format!("get {}", item.label()),
                target: item.id.to_string(),
            })?;
        if state.write_after_next_read.remove(&item) {
            if let Some(stored) = state.items.get_mut(&item) {
                stored.version += 1;
            }
        }
        Ok(current)
    }

    async fn patch_item(
        &self,
        item: ItemRef,
        changes: Map<String, Value>,
        version: u64,
    ) -> Result<TrackerItem, TrackerError> {
        let operation = format!("patch {}", item.label());
        let mut state = self.lock();
        let Some(stored) = state.items.get_mut(&item) else {
            return Err(TrackerError::NotFound {
                operation,
                target: item.id.to_string(),
            });
        };
        if stored.version != version {
            return Err(stale_version(operation));
        }
        apply_item_changes(stored, &changes);
        stored.version += 1;
        let updated = stored.clone();
        if let Some(comment) = changes.get("comment").and_then(Value::as_str) {
            state.comments.push((item, comment.to_string()));
        }
        state.writes += 1;
        Ok(updated)
    }

    async fn get_custom_attributes(
        &self,
        story_id: u64,
    ) -> Result<CustomAttributeValues, TrackerError> {
        self.lock()
            .custom_attributes
            .get(&story_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound {
                operation: "get custom attributes".to_string(),
                target: story_id.to_string(),
            })
    }

    async fn patch_custom_attributes(
        &self,
        story_id: u64,
        values: Map<String, Value>,
        version: u64,
    ) -> Result<CustomAttributeValues, TrackerError> {
        let operation = format!("patch custom attributes of userstory {story_id}");
        let mut state = self.lock();
        let Some(stored) = state.custom_attributes.get_mut(&story_id) else {
            return Err(TrackerError::NotFound {
                operation,
                target: story_id.to_string(),
            });
        };
        if stored.version != version {
            return Err(stale_version(operation));
        }
        stored.attributes_values = values;
        stored.version += 1;
        let updated = stored.clone();
        state.writes += 1;
        Ok(updated)
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<TrackerItem, TrackerError> {
        let mut state = self.lock();
        state.next_issue_id += 1;
        let id = state.next_issue_id;
        let created = TrackerItem {
            id,
            reference: Some(id),
            project: issue.project,
            status: None,
            version: 1,
            subject: issue.subject.clone(),
            watchers: Vec::new(),
            assigned_to: None,
            is_closed: false,
        };
        state
            .items
            .insert(ItemRef::new(ItemKind::Issue, id), created.clone());
        state.created_issues.push(issue.clone());
        state.writes += 1;
        Ok(created)
    }
}
