//! Tracker REST client seam and its reqwest implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tidings_core::{
    build_http_client, is_retryable_status, is_retryable_transport_error, parse_retry_after,
    retry_delay, truncate_for_error, HttpClientSettings,
};

use crate::tracker_error::TrackerError;
use crate::tracker_types::{
    CatalogRecord, CustomAttributeValues, ItemKind, ItemRef, NewIssue, TrackerItem,
    TrackerProject, TrackerUser,
};

const TRACKER_USER_AGENT: &str = "tidings-tracker-client";

#[async_trait]
/// Trait contract for the tracker endpoints the engine consumes.
pub trait TrackerClient: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<TrackerProject>, TrackerError>;

    async fn get_user(&self, user_id: u64) -> Result<TrackerUser, TrackerError>;

    async fn list_users(&self) -> Result<Vec<TrackerUser>, TrackerError>;

    async fn list_statuses(&self, kind: ItemKind) -> Result<Vec<CatalogRecord>, TrackerError>;

    async fn list_severities(&self) -> Result<Vec<CatalogRecord>, TrackerError>;

    async fn list_issue_types(&self) -> Result<Vec<CatalogRecord>, TrackerError>;

    async fn get_item(&self, item: ItemRef) -> Result<TrackerItem, TrackerError>;

    /// Applies `changes` to `item`. `version` must be the version last read.
    async fn patch_item(
        &self,
        item: ItemRef,
        changes: Map<String, Value>,
        version: u64,
    ) -> Result<TrackerItem, TrackerError>;

    async fn get_custom_attributes(
        &self,
        story_id: u64,
    ) -> Result<CustomAttributeValues, TrackerError>;

    async fn patch_custom_attributes(
        &self,
        story_id: u64,
        values: Map<String, Value>,
        version: u64,
    ) -> Result<CustomAttributeValues, TrackerError>;

    async fn create_issue(&self, issue: &NewIssue) -> Result<TrackerItem, TrackerError>;
}

#[derive(Debug, Clone)]
/// Connection settings for [`HttpTrackerClient`].
pub struct TrackerClientConfig {
    pub base_url: String,
    pub auth_token: String,
    pub http: HttpClientSettings,
}

#[derive(Clone)]
pub struct HttpTrackerClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

/// Normalizes a tracker host URL to its `/api/v1` root.
pub fn tracker_api_base(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api/v1")
    }
}

/// Exchanges username/password credentials for a bearer token.
pub async fn authenticate(
    base_url: &str,
    username: &str,
    password: &str,
    settings: HttpClientSettings,
) -> Result<String, TrackerError> {
    #[derive(Deserialize)]
    struct AuthResponse {
        auth_token: Option<String>,
    }

    let http = build_http_client(TRACKER_USER_AGENT, reqwest::header::HeaderMap::new(), settings)
        .map_err(|error| TrackerError::InvalidConfig(format!("{error:#}")))?;
    let operation = "auth";
    let response = http
        .post(format!("{}/auth", tracker_api_base(base_url)))
        .json(&json!({
            "type": "normal",
            "username": username,
            "password": password,
        }))
        .send()
        .await
        .map_err(|source| TrackerError::Transport {
            operation: operation.to_string(),
            source,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(TrackerError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
            body: String::new(),
        });
    }
    let parsed = response
        .json::<AuthResponse>()
        .await
        .map_err(|error| TrackerError::Decode {
            operation: operation.to_string(),
            detail: error.to_string(),
        })?;
    parsed
        .auth_token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| TrackerError::Decode {
            operation: operation.to_string(),
            detail: "response did not include auth_token".to_string(),
        })
}

impl HttpTrackerClient {
    pub fn new(config: TrackerClientConfig) -> Result<Self, TrackerError> {
        let token = config.auth_token.trim();
        if token.is_empty() {
            return Err(TrackerError::InvalidConfig(
                "tracker auth token cannot be empty".to_string(),
            ));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                TrackerError::InvalidConfig("invalid tracker authorization header".to_string())
            })?,
        );
        headers.insert(
            "x-disable-pagination",
            reqwest::header::HeaderValue::from_static("True"),
        );
        let settings = config.http.normalized();
        let http = build_http_client(TRACKER_USER_AGENT, headers, settings)
            .map_err(|error| TrackerError::InvalidConfig(format!("{error:#}")))?;
        Ok(Self {
            http,
            api_base: tracker_api_base(&config.base_url),
            retry_max_attempts: settings.retry_max_attempts,
            retry_base_delay_ms: settings.retry_base_delay_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn request_json<T, F>(
        &self,
        operation: &str,
        mut request_builder: F,
        retryable: bool,
    ) -> Result<T, TrackerError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let max_attempts = if retryable { self.retry_max_attempts } else { 1 };
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder().send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|error| {
                            TrackerError::Decode {
                                operation: operation.to_string(),
                                detail: error.to_string(),
                            }
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let target = response.url().path().to_string();
                    let body = response.text().await.unwrap_or_default();
                    if attempt < max_attempts && is_retryable_status(status.as_u16()) {
                        tracing::debug!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            "retrying tracker request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    if status.as_u16() == 404 {
                        return Err(TrackerError::NotFound {
                            operation: operation.to_string(),
                            target,
                        });
                    }
                    return Err(TrackerError::Status {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(TrackerError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn list_projects(&self) -> Result<Vec<TrackerProject>, TrackerError> {
        let url = self.url("projects");
        self.request_json("list projects", || self.http.get(&url), true)
            .await
    }

    async fn get_user(&self, user_id: u64) -> Result<TrackerUser, TrackerError> {
        let url = self.url(&format!("users/{user_id}"));
        self.request_json(&format!("get user {user_id}"), || self.http.get(&url), true)
            .await
    }

    async fn list_users(&self) -> Result<Vec<TrackerUser>, TrackerError> {
        let url = self.url("users");
        self.request_json("list users", || self.http.get(&url), true)
            .await
    }

    async fn list_statuses(&self, kind: ItemKind) -> Result<Vec<CatalogRecord>, TrackerError> {
        let url = self.url(kind.status_collection());
        self.request_json(
            &format!("list {}", kind.status_collection()),
            || self.http.get(&url),
            true,
        )
        .await
    }

    async fn list_severities(&self) -> Result<Vec<CatalogRecord>, TrackerError> {
        let url = self.url("severities");
        self.request_json("list severities", || self.http.get(&url), true)
            .await
    }

    async fn list_issue_types(&self) -> Result<Vec<CatalogRecord>, TrackerError> {
        let url = self.url("issue-types");
        self.request_json("list issue types", || self.http.get(&url), true)
            .await
    }

    async fn get_item(&self, item: ItemRef) -> Result<TrackerItem, TrackerError> {
        let url = self.url(&format!("{}/{}", item.kind.api_collection(), item.id));
        self.request_json(&format!("get {}", item.label()), || self.http.get(&url), true)
            .await
    }

    async fn patch_item(
        &self,
        item: ItemRef,
        mut changes: Map<String, Value>,
        version: u64,
    ) -> Result<TrackerItem, TrackerError> {
        changes.insert("version".to_string(), Value::from(version));
        let payload = Value::Object(changes);
        let url = self.url(&format!("{}/{}", item.kind.api_collection(), item.id));
        self.request_json(
            &format!("patch {}", item.label()),
            || self.http.patch(&url).json(&payload),
            false,
        )
        .await
    }

    async fn get_custom_attributes(
        &self,
        story_id: u64,
    ) -> Result<CustomAttributeValues, TrackerError> {
        let url = self.url(&format!("userstories/custom-attributes-values/{story_id}"));
        self.request_json(
            &format!("get custom attributes of userstory {story_id}"),
            || self.http.get(&url),
            true,
        )
        .await
    }

    async fn patch_custom_attributes(
        &self,
        story_id: u64,
        values: Map<String, Value>,
        version: u64,
    ) -> Result<CustomAttributeValues, TrackerError> {
        let payload = json!({
            "attributes_values": Value::Object(values),
            "version": version,
        });
        let url = self.url(&format!("userstories/custom-attributes-values/{story_id}"));
        self.request_json(
            &format!("patch custom attributes of userstory {story_id}"),
            || self.http.patch(&url).json(&payload),
            false,
        )
        .await
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<TrackerItem, TrackerError> {
        let url = self.url("issues");
        self.request_json(
            &format!("create issue in project {}", issue.project),
            || self.http.post(&url).json(issue),
            false,
        )
        .await
    }
}
