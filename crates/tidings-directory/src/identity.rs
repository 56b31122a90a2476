//! Tracker user ⇄ chat user mapping through directory records.
//!
//! A directory member links to a chat account through a custom field. The
//! member links to a tracker account either through an explicit custom field
//! or by email equality with a tracker account. Lookups read an immutable
//! [`IdentitySnapshot`]; misses may trigger one refresh-and-retry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tidings_core::{current_unix_timestamp_ms, elapsed_since_ms};
use tidings_tracker::{TrackerClient, TrackerError, TrackerUser};

use crate::directory_client::{DirectoryClient, DirectoryError, DirectoryMember};

const DEFAULT_REFRESH_INTERVAL_MS: u64 = 6 * 60 * 60 * 1_000;
const DEFAULT_MIN_REFRESH_SPACING_MS: u64 = 60 * 1_000;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Read-only identity queries against an already-loaded snapshot.
pub trait IdentityLookup: Send + Sync {
    fn chat_user_for_tracker(&self, tracker_user_id: u64) -> Option<String>;

    fn tracker_user_for_chat(&self, chat_user_id: &str) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why a chat user could not be mapped to a tracker account.
pub enum IdentityGap {
    /// No directory member carries this chat user ID.
    NoDirectoryRecord,
    /// A directory member exists but no tracker account matches it.
    NoTrackerMatch,
}

#[derive(Debug, Clone, Default)]
pub struct IdentitySnapshot {
    chat_by_tracker: HashMap<u64, String>,
    tracker_by_chat: HashMap<String, u64>,
    directory_chat_ids: HashSet<String>,
    generation: u64,
    built_unix_ms: u64,
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_ascii_lowercase();
    (!email.is_empty()).then_some(email)
}

impl IdentitySnapshot {
    /// Joins directory members with tracker accounts. An explicit tracker ID
    /// on the member wins over email matching; the first member claiming a
    /// tracker account keeps it.
    pub fn build(members: &[DirectoryMember], tracker_users: &[TrackerUser]) -> Self {
        let tracker_by_email = tracker_users
            .iter()
            .filter_map(|user| {
                user.email
                    .as_deref()
                    .and_then(normalize_email)
                    .map(|email| (email, user.id))
            })
            .collect::<HashMap<_, _>>();

        let mut snapshot = Self {
            built_unix_ms: current_unix_timestamp_ms(),
            ..Self::default()
        };
        for member in members {
            let Some(chat_user_id) = member.chat_user_id.as_deref().map(str::trim) else {
                continue;
            };
            if chat_user_id.is_empty() {
                continue;
            }
            snapshot.directory_chat_ids.insert(chat_user_id.to_string());

            let tracker_user_id = member.tracker_user_id.or_else(|| {
                member
                    .email
                    .as_deref()
                    .and_then(normalize_email)
                    .and_then(|email| tracker_by_email.get(&email).copied())
            });
            let Some(tracker_user_id) = tracker_user_id else {
                continue;
            };
            if let Some(existing) = snapshot.chat_by_tracker.get(&tracker_user_id) {
                tracing::warn!(
                    tracker_user_id,
                    kept = %existing,
                    ignored = chat_user_id,
                    "tracker account claimed by more than one directory member"
                );
                continue;
            }
            snapshot
                .chat_by_tracker
                .insert(tracker_user_id, chat_user_id.to_string());
            snapshot
                .tracker_by_chat
                .insert(chat_user_id.to_string(), tracker_user_id);
        }
        snapshot
    }

    pub fn built_unix_ms(&self) -> u64 {
        self.built_unix_ms
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn mapped_count(&self) -> usize {
        self.chat_by_tracker.len()
    }

    /// Explains a failed chat → tracker lookup; `None` when the user resolves.
    pub fn identity_gap(&self, chat_user_id: &str) -> Option<IdentityGap> {
        if self.tracker_by_chat.contains_key(chat_user_id) {
            None
        } else if self.directory_chat_ids.contains(chat_user_id) {
            Some(IdentityGap::NoTrackerMatch)
        } else {
            Some(IdentityGap::NoDirectoryRecord)
        }
    }
}

impl IdentityLookup for IdentitySnapshot {
    fn chat_user_for_tracker(&self, tracker_user_id: u64) -> Option<String> {
        self.chat_by_tracker.get(&tracker_user_id).cloned()
    }

    fn tracker_user_for_chat(&self, chat_user_id: &str) -> Option<u64> {
        self.tracker_by_chat.get(chat_user_id.trim()).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResolverConfig {
    /// Age after which [`IdentityResolver::refresh_if_stale`] rebuilds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Minimum snapshot age before a lookup miss may trigger a rebuild.
    #[serde(default = "default_min_refresh_spacing_ms")]
    pub min_refresh_spacing_ms: u64,
}

impl Default for IdentityResolverConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            min_refresh_spacing_ms: DEFAULT_MIN_REFRESH_SPACING_MS,
        }
    }
}

fn default_refresh_interval_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

fn default_min_refresh_spacing_ms() -> u64 {
    DEFAULT_MIN_REFRESH_SPACING_MS
}

pub struct IdentityResolver {
    directory: Arc<dyn DirectoryClient>,
    tracker: Arc<dyn TrackerClient>,
    snapshot: ArcSwap<IdentitySnapshot>,
    refresh_lock: tokio::sync::Mutex<()>,
    config: IdentityResolverConfig,
}

impl IdentityResolver {
    /// Loads the first snapshot. Startup treats a failure here as fatal.
    pub async fn load(
        directory: Arc<dyn DirectoryClient>,
        tracker: Arc<dyn TrackerClient>,
        config: IdentityResolverConfig,
    ) -> Result<Self, IdentityError> {
        let snapshot = fetch_snapshot(directory.as_ref(), tracker.as_ref(), 1).await?;
        Ok(Self {
            directory,
            tracker,
            snapshot: ArcSwap::from_pointee(snapshot),
            refresh_lock: tokio::sync::Mutex::new(()),
            config,
        })
    }

    pub fn snapshot(&self) -> Arc<IdentitySnapshot> {
        self.snapshot.load_full()
    }

    pub fn tracker_to_chat(&self, tracker_user_id: u64) -> Option<String> {
        self.snapshot.load().chat_user_for_tracker(tracker_user_id)
    }

    pub fn chat_to_tracker(&self, chat_user_id: &str) -> Option<u64> {
        self.snapshot.load().tracker_user_for_chat(chat_user_id)
    }

    /// Rebuilds the snapshot unconditionally.
    pub async fn refresh(&self) -> Result<(), IdentityError> {
        let _guard = self.refresh_lock.lock().await;
        self.rebuild().await
    }

    /// Rebuilds when the snapshot is older than the refresh interval. Returns
    /// whether a rebuild happened.
    pub async fn refresh_if_stale(&self) -> Result<bool, IdentityError> {
        if !self.is_older_than(self.config.refresh_interval_ms) {
            return Ok(false);
        }
        let seen = self.snapshot.load().generation;
        self.refresh_once_after(seen).await
    }

    /// Tracker → chat lookup that refreshes once on a miss.
    pub async fn resolve_tracker_to_chat(&self, tracker_user_id: u64) -> Option<String> {
        if let Some(found) = self.tracker_to_chat(tracker_user_id) {
            return Some(found);
        }
        if self.refresh_for_miss().await {
            return self.tracker_to_chat(tracker_user_id);
        }
        None
    }

    /// Chat → tracker lookup that refreshes once on a miss.
    pub async fn resolve_chat_to_tracker(&self, chat_user_id: &str) -> Option<u64> {
        if let Some(found) = self.chat_to_tracker(chat_user_id) {
            return Some(found);
        }
        if self.refresh_for_miss().await {
            return self.chat_to_tracker(chat_user_id);
        }
        None
    }

    fn is_older_than(&self, age_ms: u64) -> bool {
        let built = self.snapshot.load().built_unix_ms;
        elapsed_since_ms(built, current_unix_timestamp_ms()) >= age_ms
    }

    async fn refresh_for_miss(&self) -> bool {
        if !self.is_older_than(self.config.min_refresh_spacing_ms) {
            return false;
        }
        let seen = self.snapshot.load().generation;
        match self.refresh_once_after(seen).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(%error, "identity refresh after lookup miss failed");
                false
            }
        }
    }

    /// Rebuilds unless another task already swapped in a newer snapshot while
    /// this one waited for the lock.
    async fn refresh_once_after(&self, seen_generation: u64) -> Result<bool, IdentityError> {
        let _guard = self.refresh_lock.lock().await;
        if self.snapshot.load().generation != seen_generation {
            return Ok(true);
        }
        self.rebuild().await?;
        Ok(true)
    }

    async fn rebuild(&self) -> Result<(), IdentityError> {
        let next_generation = self.snapshot.load().generation.saturating_add(1);
        match fetch_snapshot(self.directory.as_ref(), self.tracker.as_ref(), next_generation).await
        {
            Ok(snapshot) => {
                self.snapshot.store(Arc::new(snapshot));
                Ok(())
            }
            Err(error) => {
                tracing::error!(%error, "identity refresh failed; keeping previous snapshot");
                Err(error)
            }
        }
    }
}

impl IdentityLookup for IdentityResolver {
    fn chat_user_for_tracker(&self, tracker_user_id: u64) -> Option<String> {
        self.tracker_to_chat(tracker_user_id)
    }

    fn tracker_user_for_chat(&self, chat_user_id: &str) -> Option<u64> {
        self.chat_to_tracker(chat_user_id)
    }
}

async fn fetch_snapshot(
    directory: &dyn DirectoryClient,
    tracker: &dyn TrackerClient,
    generation: u64,
) -> Result<IdentitySnapshot, IdentityError> {
    let members = directory.list_members().await?;
    let tracker_users = tracker.list_users().await?;
    let mut snapshot = IdentitySnapshot::build(&members, &tracker_users);
    snapshot.generation = generation;
    tracing::info!(
        directory_members = members.len(),
        tracker_users = tracker_users.len(),
        mapped = snapshot.mapped_count(),
        generation,
        "identity snapshot built"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tidings_tracker::in_memory::InMemoryTracker;
    use tidings_tracker::TrackerUser;

    use super::{
        IdentityGap, IdentityLookup, IdentityResolver, IdentityResolverConfig, IdentitySnapshot,
    };
    use crate::in_memory::StaticDirectory;

    fn member(id: u64, email: &str, chat: &str) -> crate::DirectoryMember {
        StaticDirectory::member(id, email, chat)
    }

    fn eager_config() -> IdentityResolverConfig {
        IdentityResolverConfig {
            refresh_interval_ms: 0,
            min_refresh_spacing_ms: 0,
        }
    }

    #[test]
    fn unit_build_matches_trimmed_case_insensitive_email() {
        let users = vec![TrackerUser {
            id: 9,
            username: "sam".to_string(),
            full_name_display: "Sam Example".to_string(),
            email: Some("Sam@Example.org".to_string()),
        }];
        let snapshot =
            IdentitySnapshot::build(&[member(1, "  sam@example.ORG ", "U009")], &users);
        assert_eq!(snapshot.chat_user_for_tracker(9).as_deref(), Some("U009"));
        assert_eq!(snapshot.tracker_user_for_chat("U009"), Some(9));
    }

    #[test]
    fn unit_build_prefers_explicit_tracker_id_and_first_claim() {
        let mut explicit = member(1, "nobody@example.org", "U001");
        explicit.tracker_user_id = Some(42);
        let mut duplicate = member(2, "other@example.org", "U002");
        duplicate.tracker_user_id = Some(42);
        let snapshot = IdentitySnapshot::build(&[explicit, duplicate], &[]);
        assert_eq!(snapshot.chat_user_for_tracker(42).as_deref(), Some("U001"));
        assert_eq!(snapshot.tracker_user_for_chat("U002"), None);
        assert_eq!(
            snapshot.identity_gap("U002"),
            Some(IdentityGap::NoTrackerMatch)
        );
        assert_eq!(
            snapshot.identity_gap("U404"),
            Some(IdentityGap::NoDirectoryRecord)
        );
        assert_eq!(snapshot.identity_gap("U001"), None);
    }

    #[tokio::test]
    async fn functional_load_maps_sample_tracker_users() {
        let directory = StaticDirectory::with(vec![member(1, "alex@example.org", "U042")]);
        let resolver = IdentityResolver::load(
            directory,
            Arc::new(InMemoryTracker::sample()),
            IdentityResolverConfig::default(),
        )
        .await
        .expect("resolver");
        assert_eq!(resolver.tracker_to_chat(42).as_deref(), Some("U042"));
        assert_eq!(resolver.chat_to_tracker("U042"), Some(42));
        assert_eq!(resolver.tracker_to_chat(7), None);
    }

    #[tokio::test]
    async fn functional_miss_refreshes_once_and_retries() {
        let directory = StaticDirectory::with(Vec::new());
        let resolver = IdentityResolver::load(
            directory.clone(),
            Arc::new(InMemoryTracker::sample()),
            eager_config(),
        )
        .await
        .expect("resolver");
        directory.push(member(2, "sam@example.org", "U009"));

        assert_eq!(resolver.resolve_chat_to_tracker("U009").await, Some(9));
        assert_eq!(directory.calls(), 2);
        assert_eq!(resolver.resolve_tracker_to_chat(9).await.as_deref(), Some("U009"));
        assert_eq!(directory.calls(), 2);
    }

    #[tokio::test]
    async fn regression_miss_within_spacing_does_not_refresh() {
        let directory = StaticDirectory::with(Vec::new());
        let resolver = IdentityResolver::load(
            directory.clone(),
            Arc::new(InMemoryTracker::sample()),
            IdentityResolverConfig::default(),
        )
        .await
        .expect("resolver");
        directory.push(member(2, "sam@example.org", "U009"));

        assert_eq!(resolver.resolve_chat_to_tracker("U009").await, None);
        assert_eq!(directory.calls(), 1);
        assert!(!resolver.refresh_if_stale().await.expect("not stale"));
    }

    #[tokio::test]
    async fn regression_failed_refresh_keeps_previous_snapshot() {
        let directory = StaticDirectory::with(vec![member(1, "alex@example.org", "U042")]);
        let resolver = IdentityResolver::load(
            directory.clone(),
            Arc::new(InMemoryTracker::sample()),
            eager_config(),
        )
        .await
        .expect("resolver");
        let generation = resolver.snapshot().generation();
        directory.set_failing(true);

        assert!(resolver.refresh().await.is_err());
        assert_eq!(resolver.resolve_chat_to_tracker("U777").await, None);
        assert_eq!(resolver.snapshot().generation(), generation);
        assert_eq!(resolver.chat_to_tracker("U042"), Some(42));
    }

    #[tokio::test]
    async fn functional_refresh_if_stale_rebuilds_old_snapshot() {
        let directory = StaticDirectory::with(Vec::new());
        let resolver = IdentityResolver::load(
            directory.clone(),
            Arc::new(InMemoryTracker::sample()),
            eager_config(),
        )
        .await
        .expect("resolver");
        assert!(resolver.refresh_if_stale().await.expect("refresh"));
        assert_eq!(resolver.snapshot().generation(), 2);
    }
}
