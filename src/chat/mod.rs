//! Chat: message visibility, threads and per-session unread counts

pub mod inbox;

pub use inbox::{
    addressed_to, in_thread, includes_for, thread_view, ChatUser, Inbox, InboxChange, ALL_THREAD,
};
