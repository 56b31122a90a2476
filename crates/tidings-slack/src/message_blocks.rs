//! Block Kit payloads for tracker notifications.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tidings_core::{current_unix_timestamp_ms, short_hash_hex};

pub const LINK_ACTION_PREFIX: &str = "tlink";
pub const WATCH_ACTION_PREFIX: &str = "twatch";
pub const ACTIONS_BLOCK_ID: &str = "button_actions";

static ACTION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Carried in the watch button value and handed back on click.
pub struct WatchTarget {
    pub project_id: u64,
    pub item_id: u64,
    #[serde(rename = "type")]
    pub item_type: String,
    pub permalink: String,
}

/// Action IDs must be unique within a message; Slack rejects duplicates.
pub fn action_id(prefix: &str, seed: &str) -> String {
    let sequence = ACTION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let key = format!("{seed}:{sequence}:{}", current_unix_timestamp_ms());
    format!("{prefix}{}", short_hash_hex(&key))
}

pub fn is_watch_action(action_id: &str) -> bool {
    action_id.starts_with(WATCH_ACTION_PREFIX)
}

/// Text section, plus link and watch buttons when the item has a permalink.
/// Items that cannot be watched (epics) get the link button only.
pub fn notification_blocks(
    text: &str,
    permalink: Option<&str>,
    watch: Option<&WatchTarget>,
) -> Vec<Value> {
    let mut blocks = vec![json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text },
    })];
    let Some(permalink) = permalink.filter(|url| !url.trim().is_empty()) else {
        return blocks;
    };
    let mut elements = vec![json!({
        "type": "button",
        "text": { "type": "plain_text", "text": "View in Taiga", "emoji": true },
        "url": permalink,
        "action_id": action_id(LINK_ACTION_PREFIX, permalink),
    })];
    if let Some(target) = watch {
        let seed = format!("{}:{}", target.item_type, target.item_id);
        elements.push(json!({
            "type": "button",
            "text": { "type": "plain_text", "text": "Watch", "emoji": true },
            "value": serde_json::to_string(target).unwrap_or_default(),
            "action_id": action_id(WATCH_ACTION_PREFIX, &seed),
        }));
    }
    blocks.push(json!({
        "type": "actions",
        "block_id": ACTIONS_BLOCK_ID,
        "elements": elements,
    }));
    blocks
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{is_watch_action, notification_blocks, WatchTarget, ACTIONS_BLOCK_ID};

    fn target() -> WatchTarget {
        WatchTarget {
            project_id: 1,
            item_id: 1000,
            item_type: "userstory".to_string(),
            permalink: "https://tasks.example.org/project/infra/us/12".to_string(),
        }
    }

    #[test]
    fn unit_plain_text_has_single_section() {
        let blocks = notification_blocks("Card changed", None, None);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["text"]["text"], "Card changed");
        assert_eq!(blocks[0]["text"]["type"], "mrkdwn");
    }

    #[test]
    fn functional_watch_button_round_trips_target_and_ids_are_unique() {
        let target = target();
        let blocks = notification_blocks("Card changed", Some(&target.permalink), Some(&target));
        assert_eq!(blocks.len(), 2);
        let actions = &blocks[1];
        assert_eq!(actions["block_id"], ACTIONS_BLOCK_ID);
        let link = &actions["elements"][0];
        let watch = &actions["elements"][1];
        assert_eq!(link["url"], target.permalink.as_str());
        let link_id = link["action_id"].as_str().expect("link id");
        let watch_id = watch["action_id"].as_str().expect("watch id");
        assert!(link_id.starts_with("tlink"));
        assert!(is_watch_action(watch_id));
        assert!(!is_watch_action(link_id));

        let value = watch["value"].as_str().expect("value");
        let decoded: WatchTarget = serde_json::from_str(value).expect("decode");
        assert_eq!(decoded, target);
        let raw: Value = serde_json::from_str(value).expect("json");
        assert_eq!(raw["type"], "userstory");

        let again = notification_blocks("Card changed", Some(&target.permalink), Some(&target));
        assert_ne!(again[1]["elements"][1]["action_id"], watch["action_id"]);
    }

    #[test]
    fn unit_unwatchable_item_gets_link_button_only() {
        let blocks = notification_blocks("Epic changed", Some("https://tasks.example.org/epic/1"), None);
        let elements = blocks[1]["elements"].as_array().expect("elements");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0]["text"]["text"], "View in Taiga");

        assert_eq!(notification_blocks("Epic changed", Some("  "), None).len(), 1);
    }
}
