//! Chat message document schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection name for chat messages
pub const MESSAGE_COLLECTION: &str = "messages";

/// Chat message. `to_id` of `None` is a broadcast to everyone.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub from_id: String,
    #[serde(default)]
    pub from_email: String,
    /// Recipient user id, or an email for messages addressed before signup
    #[serde(default)]
    pub to_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    /// Email of the user who hid the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageDoc {
    pub fn is_broadcast(&self) -> bool {
        self.to_id.as_deref().map_or(true, str::is_empty)
    }
}
