/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Milliseconds between `since_unix_ms` and `now_unix_ms`, zero when `since` is in the future.
pub fn elapsed_since_ms(since_unix_ms: u64, now_unix_ms: u64) -> u64 {
    now_unix_ms.saturating_sub(since_unix_ms)
}
