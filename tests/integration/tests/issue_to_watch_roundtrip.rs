//! Chat-created issue → signed webhook → channel notice → watch button →
//! follow-up change reaches the new watcher.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tidings_directory::in_memory::StaticDirectory;
use tidings_directory::{IdentityResolver, IdentityResolverConfig};
use tidings_events::{
    sign_webhook_body, AutomationAccount, ClassifierConfig, WEBHOOK_SIGNATURE_HEADER,
};
use tidings_gateway::{build_webhook_router, NotificationBridge, WebhookState, WEBHOOK_ENDPOINT};
use tidings_slack::in_memory::RecordingChat;
use tidings_slack::{
    ChatProfile, InteractionContext, IssueRequest, IssueSource, SlackInteraction, WatchRequest,
    WatchTarget,
};
use tidings_tracker::in_memory::InMemoryTracker;
use tidings_tracker::{ItemKind, ItemRef, MetadataCache, ProjectAliases};
use tokio::net::TcpListener;

const SECRET: &str = "roundtrip-secret";
const CREATED_ISSUE_ID: u64 = 5_001;
const PERMALINK: &str = "https://tasks.example.org/project/infrastructure/issue/5001";

struct Harness {
    chat: Arc<RecordingChat>,
    tracker: Arc<InMemoryTracker>,
    context: InteractionContext,
    addr: SocketAddr,
}

async fn harness() -> Harness {
    let chat = Arc::new(RecordingChat::default());
    chat.add_profile(ChatProfile {
        user_id: "U009".to_string(),
        real_name: Some("Sam Example".to_string()),
        display_name: Some("Sam".to_string()),
        image_72: Some("https://img/sam72.png".to_string()),
    });
    let tracker = Arc::new(InMemoryTracker::sample());
    let metadata = MetadataCache::build(tracker.as_ref(), ProjectAliases::default())
        .await
        .expect("metadata");
    let identity = Arc::new(
        IdentityResolver::load(
            StaticDirectory::with(vec![
                StaticDirectory::member(1, "alex@example.org", "U042"),
                StaticDirectory::member(2, "sam@example.org", "U009"),
            ]),
            tracker.clone(),
            IdentityResolverConfig::default(),
        )
        .await
        .expect("identity"),
    );

    let classifier = ClassifierConfig {
        project_channels: BTreeMap::from([(1, "C-INFRA".to_string())]),
        automation: AutomationAccount {
            tracker_user_id: Some(7),
            full_name: "Giant Robot".to_string(),
        },
    };
    let bridge = Arc::new(NotificationBridge::new(
        chat.clone(),
        identity.clone(),
        classifier,
    ));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("resolve listener addr");
    let app = build_webhook_router(WebhookState::new(SECRET, bridge));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let context = InteractionContext {
        chat: chat.clone(),
        tracker: tracker.clone(),
        metadata: Arc::new(metadata),
        identity,
    };
    Harness {
        chat,
        tracker,
        context,
        addr,
    }
}

fn issue_event(
    action: &str,
    actor: (u64, &str),
    description: &str,
    watchers: Vec<u64>,
    change: Value,
) -> Vec<u8> {
    json!({
        "action": action,
        "type": "issue",
        "by": {"id": actor.0, "full_name": actor.1, "photo": null},
        "date": "2026-10-19T09:00:00Z",
        "data": {
            "id": CREATED_ISSUE_ID,
            "ref": CREATED_ISSUE_ID,
            "subject": "Door sensor offline",
            "description": description,
            "project": {"id": 1, "name": "Infrastructure"},
            "tags": ["slack"],
            "assigned_to": null,
            "watchers": watchers,
            "permalink": PERMALINK
        },
        "change": change
    })
    .to_string()
    .into_bytes()
}

async fn deliver(addr: SocketAddr, body: Vec<u8>) -> (u16, String) {
    let signature = sign_webhook_body(SECRET, &body);
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{WEBHOOK_ENDPOINT}"))
        .header("content-type", "application/json")
        .header(WEBHOOK_SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await
        .expect("deliver webhook");
    let status = response.status().as_u16();
    (status, response.text().await.expect("body"))
}

fn watch_target_from(message_blocks: &[Value]) -> WatchTarget {
    let elements = message_blocks[1]["elements"]
        .as_array()
        .expect("action elements");
    let watch = elements
        .iter()
        .find(|element| element["text"]["text"] == "Watch")
        .expect("watch button");
    serde_json::from_str(watch["value"].as_str().expect("button value")).expect("watch target")
}

#[tokio::test]
async fn integration_chat_issue_roundtrips_through_webhook_and_watch_button() {
    let harness = harness().await;

    harness
        .context
        .handle(SlackInteraction::Issue(IssueRequest {
            chat_user_id: "U009".to_string(),
            text: "infra Door sensor offline".to_string(),
            source: IssueSource::SlashCommand {
                response_url: "https://hooks/roundtrip".to_string(),
            },
        }))
        .await
        .expect("issue intake");
    let created = harness.tracker.created_issues();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].project, 1);
    let description = created[0].description.clone().expect("description");
    assert_eq!(description, "Added to Taiga by: Sam Example (U009)");
    assert!(harness
        .tracker
        .item(ItemRef::new(ItemKind::Issue, CREATED_ISSUE_ID))
        .is_some());

    let created_event = issue_event(
        "create",
        (7, "Giant Robot"),
        &description,
        Vec::new(),
        Value::Null,
    );
    assert_eq!(
        deliver(harness.addr, created_event).await,
        (200, "Actioned!".to_string())
    );
    let posted = harness.chat.channel_messages();
    assert_eq!(posted.len(), 1);
    let (channel, notice) = &posted[0];
    assert_eq!(channel, "C-INFRA");
    assert_eq!(
        notice.text,
        "Issue created by Giant Robot: Door sensor offline"
    );
    assert_eq!(notice.username.as_deref(), Some("Sam | Taiga"));
    assert_eq!(notice.icon_url.as_deref(), Some("https://img/sam72.png"));

    let target = watch_target_from(&notice.blocks);
    assert_eq!(target.item_id, CREATED_ISSUE_ID);
    assert_eq!(target.permalink, PERMALINK);
    harness
        .context
        .handle(SlackInteraction::Watch(WatchRequest {
            chat_user_id: "U042".to_string(),
            channel_id: "C-INFRA".to_string(),
            target,
        }))
        .await
        .expect("watch click");
    let issue = harness
        .tracker
        .item(ItemRef::new(ItemKind::Issue, CREATED_ISSUE_ID))
        .expect("issue");
    assert_eq!(issue.watchers, vec![42]);
    let replies = harness.chat.ephemerals();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].user, "U042");
    assert_eq!(replies[0].text, "You're now watching this issue in Taiga!");

    let comment = issue_event(
        "change",
        (9, "Sam Example"),
        &description,
        issue.watchers.clone(),
        json!({"comment": "Sensor replaced", "diff": {}}),
    );
    assert_eq!(
        deliver(harness.addr, comment).await,
        (200, "Actioned!".to_string())
    );
    let direct = harness.chat.direct_messages();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].0, "U042");
    assert_eq!(
        direct[0].1.text,
        "Issue commented by <@U009>: Door sensor offline\nComment: Sensor replaced"
    );
}

#[tokio::test]
async fn integration_unknown_board_gets_usage_and_creates_nothing() {
    let harness = harness().await;
    harness
        .context
        .handle(SlackInteraction::Issue(IssueRequest {
            chat_user_id: "U009".to_string(),
            text: "kitchen Kettle descaling".to_string(),
            source: IssueSource::SlashCommand {
                response_url: "https://hooks/usage".to_string(),
            },
        }))
        .await
        .expect("usage reply");

    assert!(harness.tracker.created_issues().is_empty());
    let responses = harness.chat.responses();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].1.contains("`infrastructure`"));
}
