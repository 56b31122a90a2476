//! Foundational utilities shared across Tidings crates.
//!
//! Provides time helpers used by cache staleness checks and the HTTP transport
//! helpers (timeouts, bounded retry, error truncation) every outbound client
//! is built on.

pub mod time_utils;
pub mod transport_helpers;

pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, elapsed_since_ms};
pub use transport_helpers::{
    build_http_client, is_retryable_status, is_retryable_transport_error, parse_retry_after,
    retry_delay, short_hash_hex, truncate_for_error, HttpClientSettings,
};
