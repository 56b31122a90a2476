use std::path::PathBuf;

use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "tidings",
    about = "Taiga to Slack notification bridge",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "TIDINGS_CONFIG",
        default_value = "tidings.json",
        help = "Path to the JSON config file (channel map, aliases, directory fields)"
    )]
    pub(crate) config: PathBuf,

    #[arg(
        long,
        env = "TIDINGS_BIND",
        default_value = "0.0.0.0:32000",
        help = "Socket address the webhook server listens on"
    )]
    pub(crate) bind: String,

    #[arg(
        long = "tracker-url",
        env = "TIDINGS_TRACKER_URL",
        help = "Tracker host URL; overrides tracker.url from the config file"
    )]
    pub(crate) tracker_url: Option<String>,

    #[arg(
        long = "tracker-token",
        env = "TIDINGS_TRACKER_TOKEN",
        hide_env_values = true,
        help = "Tracker bearer token; when unset the username/password pair is exchanged for one"
    )]
    pub(crate) tracker_token: Option<String>,

    #[arg(long = "tracker-username", env = "TIDINGS_TRACKER_USERNAME")]
    pub(crate) tracker_username: Option<String>,

    #[arg(
        long = "tracker-password",
        env = "TIDINGS_TRACKER_PASSWORD",
        hide_env_values = true
    )]
    pub(crate) tracker_password: Option<String>,

    #[arg(
        long = "webhook-secret",
        env = "TIDINGS_WEBHOOK_SECRET",
        hide_env_values = true,
        value_parser = parse_non_empty,
        help = "Shared secret used to verify tracker webhook signatures"
    )]
    pub(crate) webhook_secret: String,

    #[arg(
        long = "slack-bot-token",
        env = "TIDINGS_SLACK_BOT_TOKEN",
        hide_env_values = true,
        value_parser = parse_non_empty
    )]
    pub(crate) slack_bot_token: String,

    #[arg(
        long = "slack-app-token",
        env = "TIDINGS_SLACK_APP_TOKEN",
        hide_env_values = true,
        value_parser = parse_non_empty,
        help = "App-level token used to open Socket Mode connections"
    )]
    pub(crate) slack_app_token: String,

    #[arg(
        long = "slack-api-base",
        env = "TIDINGS_SLACK_API_BASE",
        default_value = tidings_slack::DEFAULT_SLACK_API_BASE
    )]
    pub(crate) slack_api_base: String,

    #[arg(
        long = "directory-url",
        env = "TIDINGS_DIRECTORY_URL",
        help = "Membership directory API root; overrides directory.url from the config file"
    )]
    pub(crate) directory_url: Option<String>,

    #[arg(
        long = "directory-token",
        env = "TIDINGS_DIRECTORY_TOKEN",
        hide_env_values = true,
        value_parser = parse_non_empty
    )]
    pub(crate) directory_token: String,

    #[arg(
        long = "request-timeout-ms",
        env = "TIDINGS_REQUEST_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Timeout for every outbound HTTP request; overrides http.request_timeout_ms"
    )]
    pub(crate) request_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    const REQUIRED: [&str; 9] = [
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

    #[test]
    fn unit_defaults_apply_when_only_secrets_are_given() {
        let cli = Cli::try_parse_from(REQUIRED).expect("parse");
        assert_eq!(cli.bind, "0.0.0.0:32000");
        assert_eq!(cli.config.to_str(), Some("tidings.json"));
        assert_eq!(cli.slack_api_base, "https://slack.com/api");
        assert_eq!(cli.tracker_token, None);
        assert_eq!(cli.request_timeout_ms, None);
    }

    #[test]
    fn regression_blank_secret_and_zero_timeout_are_rejected() {
        let mut blank = REQUIRED.to_vec();
        blank[2] = "   ";
        assert!(Cli::try_parse_from(blank).is_err());

        let mut zero = REQUIRED.to_vec();
        zero.extend(["--request-timeout-ms", "0"]);
        assert!(Cli::try_parse_from(zero).is_err());
    }
}
