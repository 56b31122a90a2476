//! Read-mostly cache of tracker projects, workflow statuses, severities and
//! issue types.
//!
//! The cache is built wholesale from the bulk listing endpoints and published
//! as an immutable [`MetadataSnapshot`] behind an `ArcSwap`. A refresh builds a
//! complete replacement before swapping it in, so readers holding a snapshot
//! never observe a half-built cache, and a failed refresh leaves the previous
//! snapshot in place.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tidings_core::current_unix_timestamp_ms;

use crate::tracker_client::TrackerClient;
use crate::tracker_error::TrackerError;
use crate::tracker_types::{CatalogRecord, ItemKind, TrackerUser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: u64,
    pub name: String,
    pub order: i64,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Entries sorted by their tracker-supplied `order`, ascending.
pub struct OrderedCatalog {
    entries: Vec<CatalogEntry>,
}

impl OrderedCatalog {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = CatalogRecord>,
    {
        let mut entries = records
            .into_iter()
            .map(|record| CatalogEntry {
                id: record.id,
                name: record.name,
                order: record.order,
                is_closed: record.is_closed,
            })
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| left.order.cmp(&right.order).then(left.id.cmp(&right.id)));
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn order_of(&self, id: u64) -> Option<i64> {
        self.get(id).map(|entry| entry.order)
    }

    pub fn id_at_order(&self, order: i64) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| entry.order == order)
            .map(|entry| entry.id)
    }

    pub fn highest_order(&self) -> Option<i64> {
        self.entries.last().map(|entry| entry.order)
    }

    /// Case-insensitive name lookup.
    pub fn id_by_name(&self, name: &str) -> Option<u64> {
        let needle = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.name.to_lowercase() == needle)
            .map(|entry| entry.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Selects one of the per-project catalogs.
pub enum CatalogKind {
    Status(ItemKind),
    Severity,
    IssueType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMember {
    pub name: String,
    pub username: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub statuses: BTreeMap<ItemKind, OrderedCatalog>,
    pub severities: OrderedCatalog,
    pub types: OrderedCatalog,
    pub members: BTreeMap<u64, ProjectMember>,
}

impl ProjectMetadata {
    pub fn catalog(&self, kind: CatalogKind) -> Option<&OrderedCatalog> {
        match kind {
            CatalogKind::Status(item_kind) => self.statuses.get(&item_kind),
            CatalogKind::Severity => Some(&self.severities),
            CatalogKind::IssueType => Some(&self.types),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
/// Static synonym table: alias (any case) → canonical project name.
pub struct ProjectAliases(BTreeMap<String, String>);

impl Default for ProjectAliases {
    fn default() -> Self {
        Self::from_pairs([
            ("infra", "infrastructure"),
            ("laser", "lasers"),
            ("printer", "3d"),
            ("printers", "3d"),
        ])
    }
}

impl ProjectAliases {
    pub fn from_pairs<I, A, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, T)>,
        A: Into<String>,
        T: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(alias, target)| (alias.into(), target.into()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(alias, target)| (alias.as_str(), target.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
/// One consistent view of the tracker metadata.
pub struct MetadataSnapshot {
    projects: BTreeMap<u64, ProjectMetadata>,
    project_ids_by_name: HashMap<String, u64>,
    built_unix_ms: u64,
}

impl MetadataSnapshot {
    /// Assembles a snapshot from already-fetched rows. Status, severity and type
    /// rows for unknown projects are dropped.
    pub fn assemble(
        projects: Vec<ProjectMetadata>,
        statuses: BTreeMap<ItemKind, Vec<CatalogRecord>>,
        severities: Vec<CatalogRecord>,
        types: Vec<CatalogRecord>,
        aliases: &ProjectAliases,
    ) -> Self {
        let mut by_project = projects
            .into_iter()
            .map(|project| (project.id, project))
            .collect::<BTreeMap<_, _>>();

        for (kind, records) in statuses {
            for (project_id, group) in group_by_project(records) {
                match by_project.get_mut(&project_id) {
                    Some(project) => {
                        project
                            .statuses
                            .insert(kind, OrderedCatalog::from_records(group));
                    }
                    None => tracing::debug!(project_id, "ignoring statuses for unknown project"),
                }
            }
        }
        for (project_id, group) in group_by_project(severities) {
            if let Some(project) = by_project.get_mut(&project_id) {
                project.severities = OrderedCatalog::from_records(group);
            }
        }
        for (project_id, group) in group_by_project(types) {
            if let Some(project) = by_project.get_mut(&project_id) {
                project.types = OrderedCatalog::from_records(group);
            }
        }

        let mut project_ids_by_name = by_project
            .values()
            .map(|project| (project.name.to_lowercase(), project.id))
            .collect::<HashMap<_, _>>();
        for (alias, target) in aliases.iter() {
            match project_ids_by_name.get(&target.to_lowercase()).copied() {
                Some(project_id) => {
                    project_ids_by_name.insert(alias.to_lowercase(), project_id);
                }
                None => tracing::warn!(alias, target, "project alias target does not exist"),
            }
        }

        Self {
            projects: by_project,
            project_ids_by_name,
            built_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn built_unix_ms(&self) -> u64 {
        self.built_unix_ms
    }

    pub fn project(&self, project_id: u64) -> Option<&ProjectMetadata> {
        self.projects.get(&project_id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &ProjectMetadata> {
        self.projects.values()
    }

    /// Case-insensitive project lookup, including configured aliases.
    pub fn lookup_project_id(&self, name: &str) -> Option<u64> {
        self.project_ids_by_name
            .get(&name.trim().to_lowercase())
            .copied()
    }

    /// All names accepted by [`Self::lookup_project_id`], sorted.
    pub fn known_project_names(&self) -> Vec<String> {
        let mut names = self.project_ids_by_name.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn project_name(&self, project_id: u64) -> Option<&str> {
        self.project(project_id).map(|project| project.name.as_str())
    }

    pub fn member_name(&self, project_id: u64, user_id: u64) -> Option<&str> {
        self.project(project_id)?
            .members
            .get(&user_id)
            .map(|member| member.name.as_str())
    }

    pub fn statuses(&self, project_id: u64, kind: ItemKind) -> Option<&OrderedCatalog> {
        self.project(project_id)?.statuses.get(&kind)
    }

    pub fn status_order(&self, project_id: u64, kind: ItemKind, status_id: u64) -> Option<i64> {
        self.statuses(project_id, kind)?.order_of(status_id)
    }

    pub fn status_id_at_order(&self, project_id: u64, kind: ItemKind, order: i64) -> Option<u64> {
        self.statuses(project_id, kind)?.id_at_order(order)
    }

    pub fn lookup_status_id(&self, project_id: u64, kind: ItemKind, name: &str) -> Option<u64> {
        self.statuses(project_id, kind)?.id_by_name(name)
    }

    pub fn lookup_severity_id(&self, project_id: u64, name: &str) -> Option<u64> {
        self.project(project_id)?.severities.id_by_name(name)
    }

    pub fn lookup_issue_type_id(&self, project_id: u64, name: &str) -> Option<u64> {
        self.project(project_id)?.types.id_by_name(name)
    }

    /// Returns the names that do not exist in the selected catalog. An unknown
    /// project rejects every name.
    pub fn validate_options<'a>(
        &self,
        project_id: u64,
        kind: CatalogKind,
        names: &[&'a str],
    ) -> Vec<&'a str> {
        let Some(catalog) = self
            .project(project_id)
            .and_then(|project| project.catalog(kind))
        else {
            return names.to_vec();
        };
        names
            .iter()
            .copied()
            .filter(|name| catalog.id_by_name(name).is_none())
            .collect()
    }
}

fn group_by_project(records: Vec<CatalogRecord>) -> BTreeMap<u64, Vec<CatalogRecord>> {
    let mut grouped = BTreeMap::<u64, Vec<CatalogRecord>>::new();
    for record in records {
        grouped.entry(record.project).or_default().push(record);
    }
    grouped
}

/// Fetches everything needed for a snapshot. Any failed request aborts the build.
pub async fn build_metadata_snapshot(
    tracker: &dyn TrackerClient,
    aliases: &ProjectAliases,
) -> Result<MetadataSnapshot, TrackerError> {
    let raw_projects = tracker.list_projects().await?;
    let mut users = HashMap::<u64, TrackerUser>::new();
    let mut projects = Vec::with_capacity(raw_projects.len());
    for raw in raw_projects {
        let mut members = BTreeMap::new();
        for member_id in &raw.members {
            if !users.contains_key(member_id) {
                let user = tracker.get_user(*member_id).await?;
                users.insert(*member_id, user);
            }
            if let Some(user) = users.get(member_id) {
                members.insert(
                    *member_id,
                    ProjectMember {
                        name: user.full_name_display.clone(),
                        username: user.username.clone(),
                        email: user.normalized_email(),
                    },
                );
            }
        }
        projects.push(ProjectMetadata {
            id: raw.id,
            name: raw.name,
            slug: raw.slug,
            statuses: BTreeMap::new(),
            severities: OrderedCatalog::default(),
            types: OrderedCatalog::default(),
            members,
        });
    }

    let mut statuses = BTreeMap::new();
    for kind in ItemKind::ALL {
        statuses.insert(kind, tracker.list_statuses(kind).await?);
    }
    let severities = tracker.list_severities().await?;
    let types = tracker.list_issue_types().await?;

    let snapshot = MetadataSnapshot::assemble(projects, statuses, severities, types, aliases);
    tracing::info!(
        projects = snapshot.projects.len(),
        users = users.len(),
        "tracker metadata cache built"
    );
    Ok(snapshot)
}

/// Swappable holder of the current [`MetadataSnapshot`].
pub struct MetadataCache {
    snapshot: ArcSwap<MetadataSnapshot>,
    aliases: ProjectAliases,
}

impl MetadataCache {
    /// Builds the cache at startup; fails fast when any listing fails.
    pub async fn build(
        tracker: &dyn TrackerClient,
        aliases: ProjectAliases,
    ) -> Result<Self, TrackerError> {
        let snapshot = build_metadata_snapshot(tracker, &aliases).await?;
        Ok(Self::from_snapshot(snapshot, aliases))
    }

    pub fn from_snapshot(snapshot: MetadataSnapshot, aliases: ProjectAliases) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            aliases,
        }
    }

    pub fn snapshot(&self) -> Arc<MetadataSnapshot> {
        self.snapshot.load_full()
    }

    /// Rebuilds the whole cache and swaps it in. The previous snapshot stays
    /// published when the rebuild fails.
    pub async fn refresh(&self, tracker: &dyn TrackerClient) -> Result<(), TrackerError> {
        match build_metadata_snapshot(tracker, &self.aliases).await {
            Ok(snapshot) => {
                self.snapshot.store(Arc::new(snapshot));
                Ok(())
            }
            Err(error) => {
                tracing::error!(%error, "tracker metadata refresh failed; keeping previous cache");
                Err(error)
            }
        }
    }

    pub fn lookup_project_id(&self, name: &str) -> Option<u64> {
        self.snapshot.load().lookup_project_id(name)
    }

    pub fn status_order(&self, project_id: u64, kind: ItemKind, status_id: u64) -> Option<i64> {
        self.snapshot
            .load()
            .status_order(project_id, kind, status_id)
    }

    pub fn status_id_at_order(&self, project_id: u64, kind: ItemKind, order: i64) -> Option<u64> {
        self.snapshot
            .load()
            .status_id_at_order(project_id, kind, order)
    }
}

#[cfg(test)]
mod tests {
    use crate::in_memory::InMemoryTracker;
    use crate::tracker_types::{CatalogRecord, ItemKind};

    use super::{CatalogKind, MetadataCache, OrderedCatalog, ProjectAliases};

    fn record(id: u64, name: &str, order: i64, project: u64) -> CatalogRecord {
        CatalogRecord {
            id,
            name: name.to_string(),
            order,
            project,
            is_closed: false,
        }
    }

    #[test]
    fn unit_ordered_catalog_sorts_by_order_not_id() {
        let catalog = OrderedCatalog::from_records(vec![
            record(30, "Done", 3, 1),
            record(10, "New", 1, 1),
            record(20, "In progress", 2, 1),
        ]);
        let ids = catalog
            .entries()
            .iter()
            .map(|entry| entry.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(catalog.highest_order(), Some(3));
        assert_eq!(catalog.id_by_name("in PROGRESS"), Some(20));
    }

    #[tokio::test]
    async fn functional_build_groups_catalogs_per_project() {
        let tracker = InMemoryTracker::sample();
        let cache = MetadataCache::build(&tracker, ProjectAliases::default())
            .await
            .expect("cache");
        let snapshot = cache.snapshot();

        let infra = snapshot.lookup_project_id("Infrastructure").expect("infra");
        let story_statuses = snapshot
            .statuses(infra, ItemKind::Story)
            .expect("story statuses");
        assert_eq!(story_statuses.entries().len(), 3);
        assert_eq!(snapshot.lookup_severity_id(infra, "critical"), Some(501));
        assert_eq!(snapshot.lookup_issue_type_id(infra, "BUG"), Some(601));
        assert_eq!(snapshot.member_name(infra, 42), Some("Alex Member"));
    }

    #[tokio::test]
    async fn functional_lookup_project_id_is_case_insensitive_with_aliases() {
        let tracker = InMemoryTracker::sample();
        let cache = MetadataCache::build(&tracker, ProjectAliases::default())
            .await
            .expect("cache");
        let infra = cache.lookup_project_id("INFRASTRUCTURE").expect("infra");
        assert_eq!(cache.lookup_project_id("infra"), Some(infra));
        assert_eq!(cache.lookup_project_id("Printers"), cache.lookup_project_id("3d"));
        assert_eq!(cache.lookup_project_id("nonexistent"), None);
    }

    #[tokio::test]
    async fn integration_status_order_round_trips_for_every_status() {
        let tracker = InMemoryTracker::sample();
        let cache = MetadataCache::build(&tracker, ProjectAliases::default())
            .await
            .expect("cache");
        let snapshot = cache.snapshot();
        for project in snapshot.projects() {
            for (kind, catalog) in &project.statuses {
                for entry in catalog.entries() {
                    let order = snapshot
                        .status_order(project.id, *kind, entry.id)
                        .expect("order");
                    assert_eq!(
                        snapshot.status_id_at_order(project.id, *kind, order),
                        Some(entry.id)
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn regression_failed_build_publishes_nothing() {
        let tracker = InMemoryTracker::sample();
        tracker.fail_listing("issue-types");
        let result = MetadataCache::build(&tracker, ProjectAliases::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn regression_failed_refresh_keeps_previous_snapshot() {
        let tracker = InMemoryTracker::sample();
        let cache = MetadataCache::build(&tracker, ProjectAliases::default())
            .await
            .expect("cache");
        let before = cache.snapshot();

        tracker.fail_listing("severities");
        assert!(cache.refresh(&tracker).await.is_err());
        let after = cache.snapshot();
        assert_eq!(before.built_unix_ms(), after.built_unix_ms());
        assert!(cache.lookup_project_id("infra").is_some());
    }

    #[tokio::test]
    async fn unit_validate_options_reports_unknown_names() {
        let tracker = InMemoryTracker::sample();
        let cache = MetadataCache::build(&tracker, ProjectAliases::default())
            .await
            .expect("cache");
        let snapshot = cache.snapshot();
        let infra = snapshot.lookup_project_id("infra").expect("infra");
        assert_eq!(
            snapshot.validate_options(infra, CatalogKind::Severity, &["Critical", "Meh"]),
            vec!["Meh"]
        );
        assert_eq!(
            snapshot.validate_options(9_999, CatalogKind::IssueType, &["Bug"]),
            vec!["Bug"]
        );
    }

    #[test]
    fn regression_alias_to_missing_project_is_skipped() {
        let snapshot = super::MetadataSnapshot::assemble(
            Vec::new(),
            Default::default(),
            Vec::new(),
            Vec::new(),
            &ProjectAliases::from_pairs([("ghost", "nowhere")]),
        );
        assert_eq!(snapshot.lookup_project_id("ghost"), None);
    }
}
