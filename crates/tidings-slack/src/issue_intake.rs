//! Chat-originated issue creation: `/issue`, bot mentions and direct messages.
//!
//! Messages take the form `<board> <description>`. The board is matched
//! against project names and aliases in the metadata cache. The created
//! issue's description records the requesting chat user so later
//! notifications about it can be sent under their name.

use anyhow::Result;
use tidings_tracker::{MetadataCache, NewIssue, TrackerClient};
use tracing::{info, warn};

use crate::chat_platform::{ChatPlatform, ChatProfile, OutgoingMessage};

pub const CHAT_ISSUE_TAG: &str = "slack";
const CREATED_MESSAGE: &str = "The issue has been created on Taiga, thanks!";
const FAILED_MESSAGE: &str =
    "Sorry, I'm having trouble accessing Taiga right now. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueParticulars {
    /// Lowercased first word.
    pub board: String,
    pub description: String,
}

/// Splits `<board> <description>`, discarding any leading bot mention.
pub fn extract_issue_particulars(text: &str) -> Option<IssueParticulars> {
    let rest = match text.find('>') {
        Some(index) => &text[index + 1..],
        None => text,
    };
    let rest = rest.trim_start();
    let board = rest.split_whitespace().next()?;
    let description = rest[board.len()..].trim();
    Some(IssueParticulars {
        board: board.to_lowercase(),
        description: description.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueSource {
    Mention {
        channel_id: String,
        ts: String,
        thread_ts: Option<String>,
    },
    DirectMessage {
        channel_id: String,
        thread_ts: Option<String>,
    },
    SlashCommand {
        response_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub chat_user_id: String,
    pub text: String,
    pub source: IssueSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Created { project_id: u64, issue_id: u64 },
    /// The message did not name a known board or had no description.
    Unparsed,
    Failed,
}

pub fn usage_message(source: &IssueSource, board_names: &[String]) -> String {
    let format_hint = match source {
        IssueSource::SlashCommand { .. } => "`/issue <board name> <description>`",
        _ => "<board name> <description>",
    };
    let boards = board_names
        .iter()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Sorry, I couldn't understand your message. Please try again.\nIt should be in the format of {format_hint}\nValid board names are: {boards}"
    )
}

/// Appends the requester line that notification sender detection reads back.
pub fn requester_footer(description: &str, requester: &ChatProfile) -> String {
    let by = format!(
        "Added to Taiga by: {} ({})",
        requester.preferred_name(),
        requester.user_id
    );
    if description.trim().is_empty() {
        by
    } else {
        format!("{description}\n\n{by}")
    }
}

pub struct IssueIntake<'a> {
    pub chat: &'a dyn ChatPlatform,
    pub tracker: &'a dyn TrackerClient,
    pub metadata: &'a MetadataCache,
}

impl IssueIntake<'_> {
    pub async fn handle(&self, request: &IssueRequest) -> Result<IntakeOutcome> {
        let particulars = extract_issue_particulars(&request.text)
            .filter(|particulars| !particulars.description.is_empty());
        let parsed = match particulars {
            Some(particulars) => self
                .project_for_board(&particulars.board)
                .await
                .map(|project_id| (project_id, particulars)),
            None => None,
        };
        let Some((project_id, particulars)) = parsed else {
            let known = self.metadata.snapshot().known_project_names();
            let usage = usage_message(&request.source, &known);
            self.reply_privately(request, &usage).await?;
            return Ok(IntakeOutcome::Unparsed);
        };

        let requester = self.profile_or_id(&request.chat_user_id).await;
        let context = self.thread_context(&request.source).await;
        let issue = NewIssue {
            project: project_id,
            subject: particulars.description.clone(),
            description: Some(requester_footer(&context, &requester)),
            tags: vec![CHAT_ISSUE_TAG.to_string()],
            ..NewIssue::default()
        };

        match self.tracker.create_issue(&issue).await {
            Ok(created) => {
                info!(
                    project_id,
                    item_id = created.id,
                    chat_user = %request.chat_user_id,
                    "created issue from chat"
                );
                self.reply_created(request).await?;
                Ok(IntakeOutcome::Created {
                    project_id,
                    issue_id: created.id,
                })
            }
            Err(error) => {
                warn!(project_id, error = %error, "failed to create issue from chat");
                self.reply_privately(request, FAILED_MESSAGE).await?;
                Ok(IntakeOutcome::Failed)
            }
        }
    }

    /// An unknown board rebuilds the metadata cache once before giving up, so
    /// projects added after startup become reachable.
    async fn project_for_board(&self, board: &str) -> Option<u64> {
        if let Some(project_id) = self.metadata.lookup_project_id(board) {
            return Some(project_id);
        }
        if let Err(error) = self.metadata.refresh(self.tracker).await {
            warn!(board, error = %error, "metadata refresh after unknown board failed");
            return None;
        }
        self.metadata.lookup_project_id(board)
    }

    async fn profile_or_id(&self, chat_user_id: &str) -> ChatProfile {
        match self.chat.user_profile(chat_user_id).await {
            Ok(profile) => profile,
            Err(error) => {
                warn!(chat_user = chat_user_id, error = %error, "chat profile lookup failed");
                ChatProfile {
                    user_id: chat_user_id.to_string(),
                    ..ChatProfile::default()
                }
            }
        }
    }

    /// For a mention inside a thread, quotes the thread's first message.
    async fn thread_context(&self, source: &IssueSource) -> String {
        let IssueSource::Mention {
            channel_id,
            thread_ts: Some(thread_ts),
            ..
        } = source
        else {
            return String::new();
        };
        let root = match self.chat.thread_root(channel_id, thread_ts).await {
            Ok(Some(root)) => root,
            Ok(None) => return String::new(),
            Err(error) => {
                warn!(channel = %channel_id, error = %error, "thread root lookup failed");
                return String::new();
            }
        };
        let author = match root.user.as_deref() {
            Some(user_id) => self.profile_or_id(user_id).await.preferred_name().to_string(),
            None => "someone".to_string(),
        };
        format!("From {author} on Slack: {}", root.text)
    }

    async fn reply_privately(&self, request: &IssueRequest, text: &str) -> Result<()> {
        match &request.source {
            IssueSource::Mention {
                channel_id,
                thread_ts,
                ..
            }
            | IssueSource::DirectMessage {
                channel_id,
                thread_ts,
            } => {
                self.chat
                    .send_ephemeral(
                        channel_id,
                        &request.chat_user_id,
                        text,
                        thread_ts.as_deref(),
                    )
                    .await
            }
            IssueSource::SlashCommand { response_url } => {
                self.chat.respond(response_url, text).await
            }
        }
    }

    async fn reply_created(&self, request: &IssueRequest) -> Result<()> {
        match &request.source {
            IssueSource::Mention {
                channel_id,
                ts,
                thread_ts,
            } => {
                let thread = thread_ts.clone().unwrap_or_else(|| ts.clone());
                self.chat
                    .send_channel_message(
                        channel_id,
                        &OutgoingMessage::plain(CREATED_MESSAGE).in_thread(Some(thread)),
                    )
                    .await
                    .map(|_| ())
            }
            IssueSource::DirectMessage { channel_id, .. } => self
                .chat
                .send_channel_message(channel_id, &OutgoingMessage::plain(CREATED_MESSAGE))
                .await
                .map(|_| ()),
            IssueSource::SlashCommand { response_url } => {
                self.chat.respond(response_url, CREATED_MESSAGE).await
            }
        }
    }
}
