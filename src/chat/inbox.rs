//! Message visibility rules and the per-session inbox
//!
//! A message is visible to a user when it is a broadcast, addressed to
//! them (by id or by email), addressed to the admin email while they are
//! the admin, or sent by them. Threads are either `all` (broadcasts) or a
//! private conversation keyed by the other party's id or email.

use serde::Serialize;
use std::collections::HashMap;

use crate::db::schemas::MessageDoc;
use crate::store::{decode, ChangeEvent, ChangeKind, Collection};

/// Thread key for broadcast messages
pub const ALL_THREAD: &str = "all";

/// The user a chat view is computed for
#[derive(Debug, Clone, Serialize)]
pub struct ChatUser {
    pub id: String,
    /// Lowercased
    pub email: String,
    pub is_admin: bool,
}

impl ChatUser {
    pub fn new(id: &str, email: &str, is_admin: bool) -> Self {
        Self {
            id: id.to_string(),
            email: email.trim().to_lowercase(),
            is_admin,
        }
    }
}

fn recipient_is(msg: &MessageDoc, key: &str) -> bool {
    match msg.to_id.as_deref() {
        Some(to) if !to.is_empty() => to == key || to.to_lowercase() == key,
        _ => false,
    }
}

/// Private message addressed to `me`
pub fn addressed_to(msg: &MessageDoc, me: &ChatUser, admin_email: &str) -> bool {
    if msg.is_broadcast() {
        return false;
    }
    recipient_is(msg, &me.id)
        || recipient_is(msg, &me.email)
        || (me.is_admin && recipient_is(msg, admin_email))
}

/// Whether `me` may see `msg` at all
pub fn includes_for(msg: &MessageDoc, me: &ChatUser, admin_email: &str) -> bool {
    msg.is_broadcast() || addressed_to(msg, me, admin_email) || msg.from_id == me.id
}

/// Whether `msg` belongs to `thread` as seen by `me`
pub fn in_thread(msg: &MessageDoc, me: &ChatUser, thread: &str, admin_email: &str) -> bool {
    if thread == ALL_THREAD {
        return msg.is_broadcast();
    }
    if msg.is_broadcast() {
        return false;
    }

    let other = thread.to_lowercase();
    let from_self = msg.from_id == me.id;
    let from_other = msg.from_id == thread || msg.from_email.to_lowercase() == other;
    let to_other = recipient_is(msg, thread) || recipient_is(msg, &other);
    let to_me = recipient_is(msg, &me.id)
        || recipient_is(msg, &me.email)
        || (me.is_admin && other == admin_email && recipient_is(msg, admin_email));

    (from_self && to_other) || (from_other && to_me)
}

/// Visible, non-deleted messages of one thread, oldest first
pub fn thread_view(
    messages: &[MessageDoc],
    me: &ChatUser,
    thread: &str,
    admin_email: &str,
) -> Vec<MessageDoc> {
    let mut view: Vec<MessageDoc> = messages
        .iter()
        .filter(|m| !m.deleted)
        .filter(|m| includes_for(m, me, admin_email))
        .filter(|m| in_thread(m, me, thread, admin_email))
        .cloned()
        .collect();
    view.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    view
}

/// Result of feeding a change event to an [`Inbox`]
#[derive(Debug, Clone, PartialEq)]
pub enum InboxChange {
    /// Nothing visible changed
    None,
    /// A visible message was added or edited
    Upserted(MessageDoc),
    /// A message left the view (removed or soft-deleted)
    Removed(String),
}

/// One user's live view of the messages collection
#[derive(Debug)]
pub struct Inbox {
    me: ChatUser,
    admin_email: String,
    messages: Vec<MessageDoc>,
    unread: HashMap<String, u32>,
    /// Thread currently on screen; `None` while the messenger is closed
    open_thread: Option<String>,
}

impl Inbox {
    pub fn new(me: ChatUser, admin_email: &str) -> Self {
        Self {
            me,
            admin_email: admin_email.trim().to_lowercase(),
            messages: Vec::new(),
            unread: HashMap::new(),
            open_thread: None,
        }
    }

    /// Load the initial snapshot without counting anything as unread
    pub fn seed(&mut self, messages: Vec<MessageDoc>) {
        let mut visible: Vec<MessageDoc> = messages
            .into_iter()
            .filter(|m| !m.deleted && includes_for(m, &self.me, &self.admin_email))
            .collect();
        visible.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.messages = visible;
    }

    pub fn user(&self) -> &ChatUser {
        &self.me
    }

    pub fn messages(&self) -> &[MessageDoc] {
        &self.messages
    }

    pub fn unread(&self) -> &HashMap<String, u32> {
        &self.unread
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    pub fn open_thread(&self) -> Option<&str> {
        self.open_thread.as_deref()
    }

    /// Show a thread and mark everything in it as read
    pub fn open(&mut self, thread: &str) -> Vec<MessageDoc> {
        self.open_thread = Some(thread.to_string());
        let view = thread_view(&self.messages, &self.me, thread, &self.admin_email);
        self.mark_read(thread, &view);
        view
    }

    /// Close the messenger; new messages count as unread again
    pub fn close(&mut self) {
        self.open_thread = None;
    }

    fn mark_read(&mut self, thread: &str, view: &[MessageDoc]) {
        self.unread.remove(thread);
        self.unread.remove(&thread.to_lowercase());
        if thread == ALL_THREAD {
            return;
        }
        for m in view {
            if !m.from_id.is_empty() {
                self.unread.remove(&m.from_id);
            }
            if !m.from_email.is_empty() {
                self.unread.remove(&m.from_email.to_lowercase());
            }
        }
    }

    fn is_showing(&self, thread: &str) -> bool {
        self.open_thread.as_deref() == Some(thread)
    }

    /// Apply one change from the feed
    pub fn apply(&mut self, event: &ChangeEvent) -> InboxChange {
        if event.collection != Collection::Messages {
            return InboxChange::None;
        }
        let idx = self.messages.iter().position(|m| m.id == event.id);

        if event.kind == ChangeKind::Removed {
            return match idx {
                Some(i) => {
                    self.messages.remove(i);
                    InboxChange::Removed(event.id.clone())
                }
                None => InboxChange::None,
            };
        }

        let Some(msg) = event
            .doc
            .clone()
            .and_then(|doc| decode::<MessageDoc>(doc).ok())
        else {
            return InboxChange::None;
        };

        if msg.deleted {
            return match idx {
                Some(i) => {
                    self.messages.remove(i);
                    InboxChange::Removed(msg.id)
                }
                None => InboxChange::None,
            };
        }

        match (event.kind, idx) {
            (ChangeKind::Modified, Some(i)) => {
                self.messages[i] = msg.clone();
                InboxChange::Upserted(msg)
            }
            (ChangeKind::Added, _) if includes_for(&msg, &self.me, &self.admin_email) => {
                self.count_unread(&msg);
                match idx {
                    Some(i) => self.messages[i] = msg.clone(),
                    None => self.messages.push(msg.clone()),
                }
                InboxChange::Upserted(msg)
            }
            _ => InboxChange::None,
        }
    }

    /// Unread counts only grow for new incoming messages whose thread is not on screen
    fn count_unread(&mut self, msg: &MessageDoc) {
        if msg.from_id == self.me.id {
            return;
        }
        let key = if msg.is_broadcast() {
            ALL_THREAD.to_string()
        } else if addressed_to(msg, &self.me, &self.admin_email) {
            msg.from_id.clone()
        } else {
            return;
        };

        let showing = if key == ALL_THREAD {
            self.is_showing(ALL_THREAD)
        } else {
            self.open_thread
                .as_deref()
                .map(|t| in_thread(msg, &self.me, t, &self.admin_email))
                .unwrap_or(false)
        };
        if !showing {
            *self.unread.entry(key).or_insert(0) += 1;
        }
    }
}
