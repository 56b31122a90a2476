//! Membership directory client and cross-system identity resolution.

pub mod directory_client;
pub mod identity;
#[cfg(any(test, feature = "test-support"))]
pub mod in_memory;

pub use directory_client::{
    DirectoryClient, DirectoryClientConfig, DirectoryError, DirectoryFieldIds, DirectoryMember,
    HttpDirectoryClient,
};
pub use identity::{
    IdentityError, IdentityGap, IdentityLookup, IdentityResolver, IdentityResolverConfig,
    IdentitySnapshot,
};
