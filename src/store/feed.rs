//! Change feed for document writes
//!
//! Every successful write publishes a `ChangeEvent` on a tokio broadcast
//! channel. Stores publish while holding their write lock, so receivers
//! observe events in write order and sequence numbers grow in that order.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use super::Collection;

/// What happened to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One document change
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub id: String,
    /// Position in the feed, assigned on publish. Zero until published.
    pub seq: u64,
    /// Document after the write; absent for removals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

impl ChangeEvent {
    pub fn upserted(collection: Collection, id: &str, existed: bool, doc: Value) -> Self {
        Self {
            collection,
            kind: if existed {
                ChangeKind::Modified
            } else {
                ChangeKind::Added
            },
            id: id.to_string(),
            seq: 0,
            doc: Some(doc),
        }
    }

    pub fn removed(collection: Collection, id: &str) -> Self {
        Self {
            collection,
            kind: ChangeKind::Removed,
            id: id.to_string(),
            seq: 0,
            doc: None,
        }
    }
}

/// Broadcast side of the change feed
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    last_seq: Arc<AtomicU64>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            last_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to changes published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish a change and return its sequence number. The event is
    /// dropped silently when nobody listens.
    pub fn publish(&self, mut event: ChangeEvent) -> u64 {
        event.seq = self.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let seq = event.seq;
        trace!(
            "change #{} {:?} {}/{}",
            seq,
            event.kind,
            event.collection.name(),
            event.id
        );
        let _ = self.tx.send(event);
        seq
    }

    /// Sequence number of the latest published change
    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}
