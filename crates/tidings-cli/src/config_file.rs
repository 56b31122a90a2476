//! Structured settings loaded from the JSON config file and merged with
//! CLI/env flags.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tidings_core::HttpClientSettings;
use tidings_directory::{DirectoryFieldIds, IdentityResolverConfig};
use tidings_events::{AutomationAccount, ClassifierConfig};
use tidings_slack::SlackSocketRuntimeConfig;
use tidings_tracker::ProjectAliases;

use crate::cli_args::Cli;

const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BridgeConfigFile {
    #[serde(default)]
    pub(crate) tracker: TrackerSection,
    #[serde(default)]
    pub(crate) directory: DirectorySection,
    #[serde(default)]
    pub(crate) slack: SlackSection,
    /// Tracker project ID → channel ID for new/important notices.
    #[serde(default)]
    pub(crate) project_channels: BTreeMap<u64, String>,
    /// Replaces the built-in alias table when present.
    #[serde(default)]
    pub(crate) project_aliases: ProjectAliases,
    #[serde(default)]
    pub(crate) identity: IdentityResolverConfig,
    #[serde(default)]
    pub(crate) http: HttpClientSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TrackerSection {
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) automation: AutomationAccount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DirectorySection {
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) fields: DirectoryFieldIds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SlackSection {
    #[serde(default = "default_issue_command")]
    pub(crate) issue_command: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub(crate) reconnect_delay_ms: u64,
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            issue_command: default_issue_command(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

fn default_issue_command() -> String {
    tidings_slack::DEFAULT_ISSUE_COMMAND.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

pub(crate) fn load_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str::<BridgeConfigFile>(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    validate_config_file(&config)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

fn validate_config_file(config: &BridgeConfigFile) -> Result<()> {
    if config.directory.fields.chat_user_field.trim().is_empty() {
        bail!("directory.fields.chat_user_field cannot be empty");
    }
    for (project_id, channel) in &config.project_channels {
        if channel.trim().is_empty() {
            bail!("project_channels entry for project {project_id} has an empty channel ID");
        }
    }
    if !config.slack.issue_command.starts_with('/') {
        bail!(
            "slack.issue_command '{}' must start with '/'",
            config.slack.issue_command
        );
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackerAuth {
    Token(String),
    Credentials { username: String, password: String },
}

#[derive(Debug, Clone)]
/// Everything startup needs, after flags have overridden file values.
pub(crate) struct RuntimeSettings {
    pub(crate) bind: String,
    pub(crate) webhook_secret: String,
    pub(crate) tracker_url: String,
    pub(crate) tracker_auth: TrackerAuth,
    pub(crate) slack_api_base: String,
    pub(crate) slack_bot_token: String,
    pub(crate) slack_app_token: String,
    pub(crate) directory_url: String,
    pub(crate) directory_token: String,
    pub(crate) directory_fields: DirectoryFieldIds,
    pub(crate) classifier: ClassifierConfig,
    pub(crate) aliases: ProjectAliases,
    pub(crate) identity: IdentityResolverConfig,
    pub(crate) http: HttpClientSettings,
    pub(crate) socket: SlackSocketRuntimeConfig,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn resolve_runtime_settings(
    cli: &Cli,
    file: BridgeConfigFile,
) -> Result<RuntimeSettings> {
    let tracker_url = non_blank(cli.tracker_url.as_deref())
        .or_else(|| non_blank(file.tracker.url.as_deref()))
        .context("tracker URL is required (--tracker-url or tracker.url)")?;
    let directory_url = non_blank(cli.directory_url.as_deref())
        .or_else(|| non_blank(file.directory.url.as_deref()))
        .context("directory URL is required (--directory-url or directory.url)")?;

    let tracker_auth = match non_blank(cli.tracker_token.as_deref()) {
        Some(token) => TrackerAuth::Token(token),
        None => {
            let username = non_blank(cli.tracker_username.as_deref());
            let password = cli
                .tracker_password
                .clone()
                .filter(|password| !password.is_empty());
            match (username, password) {
                (Some(username), Some(password)) => {
                    TrackerAuth::Credentials { username, password }
                }
                _ => bail!(
                    "tracker credentials are required: set --tracker-token or both --tracker-username and --tracker-password"
                ),
            }
        }
    };

    let mut http = file.http;
    if let Some(timeout_ms) = cli.request_timeout_ms {
        http.request_timeout_ms = timeout_ms;
    }

    Ok(RuntimeSettings {
        bind: cli.bind.clone(),
        webhook_secret: cli.webhook_secret.clone(),
        tracker_url,
        tracker_auth,
        slack_api_base: cli.slack_api_base.clone(),
        slack_bot_token: cli.slack_bot_token.clone(),
        slack_app_token: cli.slack_app_token.clone(),
        directory_url,
        directory_token: cli.directory_token.clone(),
        directory_fields: file.directory.fields,
        classifier: ClassifierConfig {
            project_channels: file.project_channels,
            automation: file.tracker.automation,
        },
        aliases: file.project_aliases,
        identity: file.identity,
        http: http.normalized(),
        socket: SlackSocketRuntimeConfig {
            reconnect_delay: Duration::from_millis(file.slack.reconnect_delay_ms.max(1)),
            issue_command: file.slack.issue_command,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;
    use serde_json::json;

    use super::{load_config_file, resolve_runtime_settings, BridgeConfigFile, TrackerAuth};
    use crate::cli_args::Cli;

    fn write_config(value: &serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(value.to_string().as_bytes())
            .expect("write config");
        file
    }

    fn cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "tidings",
            "--webhook-secret",
            "hook",
            "--slack-bot-token",
            "xoxb-1",
            "--slack-app-token",
            "xapp-1",
            "--directory-token",
            "dir-1",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).expect("parse cli")
    }

    fn full_config() -> serde_json::Value {
        json!({
            "tracker": {
                "url": "https://tasks.example.org",
                "automation": {"tracker_user_id": 77, "full_name": "Giant Robot"}
            },
            "directory": {
                "url": "https://members.example.org/v1",
                "fields": {"chat_user_field": "slack-id", "tracker_user_field": "taiga-id"}
            },
            "slack": {"issue_command": "/ticket"},
            "project_channels": {"1": "C-INFRA", "3": "C-PRINT"},
            "project_aliases": {"ops": "infrastructure"},
            "identity": {"refresh_interval_ms": 60000},
            "http": {"request_timeout_ms": 5000}
        })
    }

    #[test]
    fn functional_load_config_file_reads_every_section() {
        let file = write_config(&full_config());
        let config = load_config_file(file.path()).expect("load");

        assert_eq!(config.tracker.url.as_deref(), Some("https://tasks.example.org"));
        assert_eq!(config.tracker.automation.tracker_user_id, Some(77));
        assert_eq!(config.directory.fields.chat_user_field, "slack-id");
        assert_eq!(
            config.directory.fields.tracker_user_field.as_deref(),
            Some("taiga-id")
        );
        assert_eq!(config.project_channels.get(&3).map(String::as_str), Some("C-PRINT"));
        assert_eq!(
            config.project_aliases.iter().collect::<Vec<_>>(),
            vec![("ops", "infrastructure")]
        );
        assert_eq!(config.identity.refresh_interval_ms, 60_000);
        assert_eq!(config.http.request_timeout_ms, 5_000);
        assert_eq!(config.http.retry_max_attempts, 3);
        assert_eq!(config.slack.issue_command, "/ticket");
        assert_eq!(config.slack.reconnect_delay_ms, 2_000);
    }

    #[test]
    fn regression_config_file_errors_name_the_path() {
        let missing = std::path::Path::new("/nonexistent/tidings.json");
        let error = load_config_file(missing).expect_err("missing file");
        assert!(format!("{error:#}").contains("/nonexistent/tidings.json"));

        let typo = write_config(&json!({"project_chanels": {}}));
        assert!(load_config_file(typo.path()).is_err());

        let mut blank_channel = full_config();
        blank_channel["project_channels"]["1"] = json!(" ");
        let blank_channel = write_config(&blank_channel);
        let error = load_config_file(blank_channel.path()).expect_err("blank channel");
        assert!(format!("{error:#}").contains("project 1"));

        let no_field = write_config(&json!({"directory": {"url": "https://members.example.org"}}));
        assert!(load_config_file(no_field.path()).is_err());
    }

    #[test]
    fn functional_flags_override_file_values() {
        let file: BridgeConfigFile = serde_json::from_value(full_config()).expect("config");
        let settings = resolve_runtime_settings(
            &cli(&[
                "--tracker-url",
                "https://staging.example.org",
                "--tracker-token",
                "tok",
                "--request-timeout-ms",
                "750",
            ]),
            file,
        )
        .expect("settings");

        assert_eq!(settings.tracker_url, "https://staging.example.org");
        assert_eq!(settings.directory_url, "https://members.example.org/v1");
        assert_eq!(settings.tracker_auth, TrackerAuth::Token("tok".to_string()));
        assert_eq!(settings.http.request_timeout_ms, 750);
        assert_eq!(settings.classifier.automation.full_name, "Giant Robot");
        assert_eq!(
            settings.classifier.project_channels.get(&1).map(String::as_str),
            Some("C-INFRA")
        );
        assert_eq!(settings.socket.issue_command, "/ticket");
    }

    #[test]
    fn unit_missing_token_falls_back_to_credentials_or_fails() {
        let file: BridgeConfigFile = serde_json::from_value(full_config()).expect("config");
        let settings = resolve_runtime_settings(
            &cli(&["--tracker-username", "bot", "--tracker-password", "pw"]),
            file.clone(),
        )
        .expect("settings");
        assert_eq!(
            settings.tracker_auth,
            TrackerAuth::Credentials {
                username: "bot".to_string(),
                password: "pw".to_string()
            }
        );

        let error = resolve_runtime_settings(&cli(&["--tracker-username", "bot"]), file)
            .expect_err("no password");
        assert!(error.to_string().contains("tracker credentials"));

        let error = resolve_runtime_settings(
            &cli(&["--tracker-token", "tok"]),
            BridgeConfigFile::default(),
        )
        .expect_err("no url");
        assert!(error.to_string().contains("tracker URL"));
    }
}
