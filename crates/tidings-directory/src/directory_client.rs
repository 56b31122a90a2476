//! Membership directory REST client.
//!
//! The directory stores a contact per member. Chat and tracker account IDs live
//! in custom fields whose IDs are deployment configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tidings_core::{
    build_http_client, is_retryable_status, is_retryable_transport_error, parse_retry_after,
    retry_delay, truncate_for_error, HttpClientSettings,
};

const DIRECTORY_USER_AGENT: &str = "tidings-directory-client";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("directory {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode directory {operation}: {detail}")]
    Decode { operation: String, detail: String },
    #[error("invalid directory configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One directory member as seen by identity resolution.
pub struct DirectoryMember {
    pub id: u64,
    pub display_name: String,
    pub email: Option<String>,
    pub chat_user_id: Option<String>,
    pub tracker_user_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Custom field IDs that carry the linked account identifiers.
pub struct DirectoryFieldIds {
    pub chat_user_field: String,
    #[serde(default)]
    pub tracker_user_field: Option<String>,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_members(&self) -> Result<Vec<DirectoryMember>, DirectoryError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryClientConfig {
    pub base_url: String,
    pub access_token: String,
    pub fields: DirectoryFieldIds,
    pub http: HttpClientSettings,
}

#[derive(Debug, Deserialize)]
struct RawCustomField {
    id: Value,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    id: u64,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    custom_fields: Vec<RawCustomField>,
}

fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

impl RawContact {
    fn custom_field(&self, field_id: &str) -> Option<String> {
        self.custom_fields
            .iter()
            .find(|field| value_as_text(&field.id).as_deref() == Some(field_id))
            .and_then(|field| value_as_text(&field.value))
    }

    fn into_member(self, fields: &DirectoryFieldIds) -> DirectoryMember {
        let chat_user_id = self.custom_field(&fields.chat_user_field);
        let tracker_user_id = fields
            .tracker_user_field
            .as_deref()
            .and_then(|field_id| self.custom_field(field_id))
            .and_then(|raw| raw.parse::<u64>().ok());
        let display_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        DirectoryMember {
            id: self.id,
            display_name,
            email: self
                .email_address
                .map(|email| email.trim().to_ascii_lowercase())
                .filter(|email| !email.is_empty()),
            chat_user_id,
            tracker_user_id,
        }
    }
}

#[derive(Clone)]
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    api_base: String,
    fields: DirectoryFieldIds,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl HttpDirectoryClient {
    pub fn new(config: DirectoryClientConfig) -> Result<Self, DirectoryError> {
        let token = config.access_token.trim();
        if token.is_empty() {
            return Err(DirectoryError::InvalidConfig(
                "directory access token cannot be empty".to_string(),
            ));
        }
        if config.fields.chat_user_field.trim().is_empty() {
            return Err(DirectoryError::InvalidConfig(
                "directory chat user field id cannot be empty".to_string(),
            ));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                DirectoryError::InvalidConfig("invalid directory authorization header".to_string())
            })?,
        );
        let settings = config.http.normalized();
        let http = build_http_client(DIRECTORY_USER_AGENT, headers, settings)
            .map_err(|error| DirectoryError::InvalidConfig(format!("{error:#}")))?;
        Ok(Self {
            http,
            api_base: config.base_url.trim().trim_end_matches('/').to_string(),
            fields: config.fields,
            retry_max_attempts: settings.retry_max_attempts,
            retry_base_delay_ms: settings.retry_base_delay_ms,
        })
    }

    async fn get_contacts(&self) -> Result<Vec<RawContact>, DirectoryError> {
        let operation = "list contacts";
        let url = format!("{}/contacts", self.api_base);
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match self.http.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Vec<RawContact>>().await.map_err(|error| {
                            DirectoryError::Decode {
                                operation: operation.to_string(),
                                detail: error.to_string(),
                            }
                        });
                    }
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    return Err(DirectoryError::Status {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(DirectoryError::Transport {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_members(&self) -> Result<Vec<DirectoryMember>, DirectoryError> {
        let contacts = self.get_contacts().await?;
        Ok(contacts
            .into_iter()
            .map(|contact| contact.into_member(&self.fields))
            .collect())
    }
}
