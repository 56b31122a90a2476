//! Tracker REST client, metadata cache and versioned mutation protocol.

pub mod metadata_cache;
pub mod mutation;
pub mod tracker_client;
pub mod tracker_error;
pub mod tracker_types;

#[cfg(any(test, feature = "test-support"))]
pub mod in_memory;

pub use metadata_cache::{
    build_metadata_snapshot, CatalogEntry, CatalogKind, MetadataCache, MetadataSnapshot,
    OrderedCatalog, ProjectAliases, ProjectMember, ProjectMetadata,
};
pub use mutation::{
    add_comment, add_watcher, mutate_versioned, progress_status, set_custom_field, set_status,
    CustomAttributesResource, ItemResource, MutationError, MutationPlan, MutationReceipt,
    Versioned, VersionedResource,
};
pub use tracker_client::{
    authenticate, tracker_api_base, HttpTrackerClient, TrackerClient, TrackerClientConfig,
};
pub use tracker_error::TrackerError;
pub use tracker_types::{
    CatalogRecord, CustomAttributeValues, ItemKind, ItemRef, NewIssue, TrackerItem,
    TrackerProject, TrackerUser,
};
