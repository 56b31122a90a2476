//! Optimistic-concurrency writes against versioned tracker documents.
//!
//! Every write reads the document, computes the change locally and patches it
//! with the version that was read. The sequence runs exactly once: a rejected
//! write is reported to the caller and never replayed, because replaying a
//! stale read could overwrite a concurrent edit.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::metadata_cache::MetadataSnapshot;
use crate::tracker_client::TrackerClient;
use crate::tracker_error::TrackerError;
use crate::tracker_types::{CustomAttributeValues, ItemRef, TrackerItem};

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[async_trait]
/// A tracker document that is read and written with a version token.
pub trait VersionedResource: Send + Sync {
    type Document: Send + Sync;

    fn label(&self) -> String;

    async fn read(
        &self,
        tracker: &dyn TrackerClient,
    ) -> Result<Versioned<Self::Document>, TrackerError>;

    async fn write(
        &self,
        tracker: &dyn TrackerClient,
        changes: Map<String, Value>,
        version: u64,
    ) -> Result<Versioned<Self::Document>, TrackerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A story, task or issue.
pub struct ItemResource(pub ItemRef);

#[async_trait]
impl VersionedResource for ItemResource {
    type Document = TrackerItem;

    fn label(&self) -> String {
        self.0.label()
    }

    async fn read(
        &self,
        tracker: &dyn TrackerClient,
    ) -> Result<Versioned<TrackerItem>, TrackerError> {
        let item = tracker.get_item(self.0).await?;
        Ok(Versioned {
            version: item.version,
            value: item,
        })
    }

    async fn write(
        &self,
        tracker: &dyn TrackerClient,
        changes: Map<String, Value>,
        version: u64,
    ) -> Result<Versioned<TrackerItem>, TrackerError> {
        let item = tracker.patch_item(self.0, changes, version).await?;
        Ok(Versioned {
            version: item.version,
            value: item,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Custom attribute values of a story. Versioned independently of the story.
pub struct CustomAttributesResource {
    pub story_id: u64,
}

#[async_trait]
impl VersionedResource for CustomAttributesResource {
    type Document = CustomAttributeValues;

    fn label(&self) -> String {
        format!("custom attributes of userstory {}", self.story_id)
    }

    async fn read(
        &self,
        tracker: &dyn TrackerClient,
    ) -> Result<Versioned<CustomAttributeValues>, TrackerError> {
        let values = tracker.get_custom_attributes(self.story_id).await?;
        Ok(Versioned {
            version: values.version,
            value: values,
        })
    }

    async fn write(
        &self,
        tracker: &dyn TrackerClient,
        changes: Map<String, Value>,
        version: u64,
    ) -> Result<Versioned<CustomAttributeValues>, TrackerError> {
        let values = tracker
            .patch_custom_attributes(self.story_id, changes, version)
            .await?;
        Ok(Versioned {
            version: values.version,
            value: values,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Result of the compute step.
pub enum MutationPlan {
    Write(Map<String, Value>),
    NoChange,
}

impl MutationPlan {
    pub fn single(field: &str, value: Value) -> Self {
        let mut changes = Map::new();
        changes.insert(field.to_string(), value);
        Self::Write(changes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReceipt {
    pub target: String,
    pub read_version: u64,
    /// `None` when the compute step decided nothing had to be written.
    pub new_version: Option<u64>,
}

impl MutationReceipt {
    pub fn wrote(&self) -> bool {
        self.new_version.is_some()
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{target} is already at its final status")]
    AlreadyFinal { target: String },
    #[error("{target} has no status at order {order}")]
    StatusNotFound { target: String, order: i64 },
    #[error("{target} has status {status:?} which is not in the metadata cache")]
    UnknownStatus { target: String, status: Option<u64> },
    #[error("user {user_id} already watches {target}")]
    AlreadyWatching { target: String, user_id: u64 },
    #[error("version conflict writing {target} (read version {version}): {detail}")]
    Conflict {
        target: String,
        version: u64,
        detail: String,
    },
    #[error(transparent)]
    Upstream(#[from] TrackerError),
}

impl MutationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    fn from_write(target: String, version: u64, error: TrackerError) -> Self {
        if error.is_version_conflict() {
            Self::Conflict {
                target,
                version,
                detail: error.to_string(),
            }
        } else {
            Self::Upstream(error)
        }
    }
}

/// Runs one read → compute → write cycle against `resource`.
pub async fn mutate_versioned<R, F>(
    tracker: &dyn TrackerClient,
    resource: &R,
    compute: F,
) -> Result<MutationReceipt, MutationError>
where
    R: VersionedResource + ?Sized,
    F: FnOnce(&R::Document) -> Result<MutationPlan, MutationError> + Send,
{
    let target = resource.label();
    let (read_version, plan) = {
        let current = resource.read(tracker).await?;
        (current.version, compute(&current.value)?)
    };

    let changes = match plan {
        MutationPlan::NoChange => {
            tracing::debug!(mutation = %target, version = read_version, "mutation skipped; no change");
            return Ok(MutationReceipt {
                target,
                read_version,
                new_version: None,
            });
        }
        MutationPlan::Write(changes) => changes,
    };

    match resource.write(tracker, changes, read_version).await {
        Ok(written) => {
            tracing::info!(
                mutation = %target,
                read_version,
                new_version = written.version,
                "tracker mutation applied"
            );
            Ok(MutationReceipt {
                target,
                read_version,
                new_version: Some(written.version),
            })
        }
        Err(error) => {
            tracing::warn!(mutation = %target, read_version, %error, "tracker mutation rejected");
            Err(MutationError::from_write(target, read_version, error))
        }
    }
}

/// Moves `item` to the status whose order is one above its current status.
pub async fn progress_status(
    tracker: &dyn TrackerClient,
    metadata: &MetadataSnapshot,
    item: ItemRef,
) -> Result<MutationReceipt, MutationError> {
    let target = item.label();
    mutate_versioned(tracker, &ItemResource(item), |current: &TrackerItem| {
        let unknown = || MutationError::UnknownStatus {
            target: target.clone(),
            status: current.status,
        };
        let status = current.status.ok_or_else(unknown)?;
        let catalog = metadata
            .statuses(current.project, item.kind)
            .ok_or_else(unknown)?;
        let order = catalog.order_of(status).ok_or_else(unknown)?;
        if catalog.highest_order().is_some_and(|highest| order >= highest) {
            return Err(MutationError::AlreadyFinal {
                target: target.clone(),
            });
        }
        let next_order = order + 1;
        let next = catalog
            .id_at_order(next_order)
            .ok_or_else(|| MutationError::StatusNotFound {
                target: target.clone(),
                order: next_order,
            })?;
        Ok(MutationPlan::single("status", Value::from(next)))
    })
    .await
}

pub async fn set_status(
    tracker: &dyn TrackerClient,
    item: ItemRef,
    status_id: u64,
) -> Result<MutationReceipt, MutationError> {
    mutate_versioned(tracker, &ItemResource(item), |current: &TrackerItem| {
        if current.status == Some(status_id) {
            return Ok(MutationPlan::NoChange);
        }
        Ok(MutationPlan::single("status", Value::from(status_id)))
    })
    .await
}

pub async fn add_watcher(
    tracker: &dyn TrackerClient,
    item: ItemRef,
    user_id: u64,
) -> Result<MutationReceipt, MutationError> {
    mutate_versioned(tracker, &ItemResource(item), |current: &TrackerItem| {
        if current.watchers.contains(&user_id) {
            return Err(MutationError::AlreadyWatching {
                target: item.label(),
                user_id,
            });
        }
        let mut watchers = current.watchers.clone();
        watchers.push(user_id);
        Ok(MutationPlan::single("watchers", Value::from(watchers)))
    })
    .await
}

pub async fn add_comment(
    tracker: &dyn TrackerClient,
    item: ItemRef,
    text: &str,
) -> Result<MutationReceipt, MutationError> {
    let text = text.trim().to_string();
    mutate_versioned(tracker, &ItemResource(item), move |_current: &TrackerItem| {
        if text.is_empty() {
            return Ok(MutationPlan::NoChange);
        }
        Ok(MutationPlan::single("comment", Value::String(text)))
    })
    .await
}

/// Sets one custom attribute of a story, keeping the other attribute values.
pub async fn set_custom_field(
    tracker: &dyn TrackerClient,
    story_id: u64,
    field_id: u64,
    value: Value,
) -> Result<MutationReceipt, MutationError> {
    let key = field_id.to_string();
    mutate_versioned(
        tracker,
        &CustomAttributesResource { story_id },
        move |current: &CustomAttributeValues| {
            if current.attributes_values.get(&key) == Some(&value) {
                return Ok(MutationPlan::NoChange);
            }
            let mut values = current.attributes_values.clone();
            values.insert(key, value);
            Ok(MutationPlan::Write(values))
        },
    )
    .await
}
