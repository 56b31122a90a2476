//! Slack side of the bridge: Web API client, Socket Mode runtime, notification
//! blocks and the interactive flows (watch button, issue intake).

pub mod chat_platform;
#[cfg(any(test, feature = "test-support"))]
pub mod in_memory;
pub mod issue_intake;
pub mod message_blocks;
pub mod slack_runtime;
pub mod watch_action;

pub use chat_platform::{ChatPlatform, ChatProfile, OutgoingMessage, PostedMessage, ThreadMessage};
pub use issue_intake::{
    extract_issue_particulars, usage_message, IntakeOutcome, IssueIntake, IssueParticulars,
    IssueRequest, IssueSource,
};
pub use message_blocks::{notification_blocks, WatchTarget};
pub use slack_runtime::{
    run_slack_socket_runtime, InteractionContext, SlackApiClient, SlackBotIdentity,
    SlackClientConfig, SlackInteraction, SlackSocketRuntimeConfig, DEFAULT_ISSUE_COMMAND,
    DEFAULT_SLACK_API_BASE,
};
pub use watch_action::{handle_watch, WatchOutcome, WatchRequest};
