//! Tracker webhook events: authentication, parsing, classification and
//! notification text.

pub mod change_event;
pub mod classifier;
pub mod diff_render;
pub mod signature;

pub use change_event::{
    Actor, Assignee, ChangeEvent, EventAction, EventItemType, EventParseError, EventPayload,
    FieldDiff, ItemSnapshot,
};
pub use classifier::{
    classify, requester_chat_id, sender_identity, AutomationAccount, Classification,
    ClassifierConfig, RecipientSet, SenderIdentity, Trigger, IMPORTANT_TAG,
};
pub use diff_render::{mention_or_name, render, RenderedNotification};
pub use signature::{
    sign_webhook_body, verify_webhook_signature, SignatureError, WEBHOOK_SIGNATURE_HEADER,
};
