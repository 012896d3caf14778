//! Edit history entries shared by projects, deepwells and reforestations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    #[default]
    Create,
    Edit,
}

/// Who touched a record and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEntry {
    #[serde(default)]
    pub email: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub action: EditAction,
}

impl EditEntry {
    pub fn now(email: &str, action: EditAction) -> Self {
        Self {
            email: email.to_string(),
            timestamp: Utc::now(),
            action,
        }
    }
}

/// Append an entry for this save; `create` when there was no previous record
pub fn record_edit(previous: Option<&[EditEntry]>, email: &str) -> Vec<EditEntry> {
    let mut history = previous.map(|h| h.to_vec()).unwrap_or_default();
    let action = if previous.is_some() {
        EditAction::Edit
    } else {
        EditAction::Create
    };
    history.push(EditEntry::now(email, action));
    history
}

/// Newest first, for display
pub fn sorted_desc(history: &[EditEntry]) -> Vec<EditEntry> {
    let mut sorted = history.to_vec();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted
}
