use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates failures surfaced by tracker API calls.
pub enum TrackerError {
    #[error("tracker {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("tracker {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode tracker {operation}: {detail}")]
    Decode { operation: String, detail: String },
    #[error("tracker {operation} target not found: {target}")]
    NotFound { operation: String, target: String },
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),
}

impl TrackerError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    /// True when the tracker rejected a write because the supplied version was stale.
    pub fn is_version_conflict(&self) -> bool {
        match self {
            Self::Status { status, body, .. } => {
                matches!(status, 409 | 412)
                    || (*status == 400 && body.to_ascii_lowercase().contains("version"))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TrackerError;

    fn status(status: u16, body: &str) -> TrackerError {
        TrackerError::Status {
            operation: "patch userstory 1".to_string(),
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn unit_version_conflict_detects_precondition_statuses() {
        assert!(status(409, "").is_version_conflict());
        assert!(status(412, "").is_version_conflict());
    }

    #[test]
    fn unit_version_conflict_detects_bad_request_mentioning_version() {
        assert!(status(
            400,
            r#"{"version": "The version doesn't match with the current one"}"#
        )
        .is_version_conflict());
        assert!(!status(400, r#"{"status": "invalid pk"}"#).is_version_conflict());
        assert!(!status(500, "version").is_version_conflict());
    }
}
