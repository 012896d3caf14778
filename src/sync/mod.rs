//! Live read models
//!
//! A [`LiveView`] keeps an in-memory copy of one collection. It loads a
//! snapshot, then applies change feed events. Writers also apply their own
//! saves locally so a follow-up read sees the write before its change event
//! has been processed.
//!
//! Feed events and local applies race, so every change carries the feed
//! sequence number of its write. The view remembers the newest number seen
//! per id, removals included, and drops anything older.
//!
//! When the receiver lags behind the feed the view reloads a full snapshot
//! instead of trying to replay what it missed.

use dashmap::DashMap;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::schemas::{Deepwell, Project, Reforestation};
use crate::store::{decode, load_all, ChangeEvent, ChangeKind, DocumentStore, Record};
use crate::types::Result;

/// In-memory copy of one collection, kept current from the change feed
pub struct LiveView<T: Record + Clone> {
    items: DashMap<String, T>,
    /// Newest change sequence number applied per id. Kept after removal.
    versions: DashMap<String, u64>,
    resyncs: AtomicU64,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record + Clone + 'static> LiveView<T> {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            versions: DashMap::new(),
            resyncs: AtomicU64::new(0),
            _record: PhantomData,
        }
    }

    /// Load a snapshot and follow the store's change feed
    pub async fn start(store: Arc<dyn DocumentStore>) -> Result<Arc<Self>> {
        // Subscribe first so nothing written during the snapshot is missed
        let rx = store.feed().subscribe();
        let view = Arc::new(Self::new());
        view.reload(store.as_ref()).await?;
        info!(
            "Live view for {} loaded with {} documents",
            T::COLLECTION,
            view.len()
        );
        view.clone().follow(Arc::downgrade(&store), rx);
        Ok(view)
    }

    /// Apply feed events until the store is dropped
    pub fn follow(
        self: Arc<Self>,
        store: Weak<dyn DocumentStore>,
        mut rx: broadcast::Receiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.apply(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Live view for {} lagged by {} events, reloading",
                            T::COLLECTION,
                            skipped
                        );
                        let Some(store) = store.upgrade() else { break };
                        if let Err(e) = self.reload(store.as_ref()).await {
                            error!("Live view reload for {} failed: {}", T::COLLECTION, e);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Live view for {} stopped", T::COLLECTION);
        })
    }

    /// Replace the contents with a fresh snapshot. Entries changed after
    /// the snapshot started are kept as they are.
    pub async fn reload(&self, store: &dyn DocumentStore) -> Result<()> {
        let taken_at = store.feed().last_seq();
        let records: Vec<T> = load_all(store).await?;
        let fresh: HashSet<String> = records.iter().map(|r| r.record_id().to_string()).collect();

        let stale: Vec<String> = self
            .items
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !fresh.contains(id))
            .collect();
        for id in stale {
            self.change(&id, taken_at, None);
        }
        for record in records {
            let id = record.record_id().to_string();
            self.change(&id, taken_at, Some(record));
        }
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Set or remove one entry unless a newer change was already applied.
    /// Sequence number zero means unordered and always applies.
    fn change(&self, id: &str, seq: u64, record: Option<T>) -> bool {
        let mut version = self.versions.entry(id.to_string()).or_insert(0);
        if seq != 0 && seq < *version {
            return false;
        }
        *version = (*version).max(seq);
        match record {
            Some(record) => {
                self.items.insert(id.to_string(), record);
            }
            None => {
                self.items.remove(id);
            }
        }
        true
    }

    /// Apply one change event; events for other collections are ignored
    pub fn apply(&self, event: &ChangeEvent) {
        if event.collection != T::COLLECTION {
            return;
        }
        let applied = match event.kind {
            ChangeKind::Added | ChangeKind::Modified => {
                let Some(doc) = event.doc.clone() else { return };
                match decode::<T>(doc) {
                    Ok(record) => self.change(&event.id, event.seq, Some(record)),
                    Err(e) => {
                        warn!("Ignoring {} change for {}: {}", T::COLLECTION, event.id, e);
                        return;
                    }
                }
            }
            ChangeKind::Removed => self.change(&event.id, event.seq, None),
        };
        if !applied {
            debug!("Skipped stale {} change #{} for {}", T::COLLECTION, event.seq, event.id);
        }
    }

    /// Optimistic local upsert after a successful save, `seq` being the
    /// sequence number the store returned for it
    pub fn apply_local(&self, record: T, seq: u64) {
        let id = record.record_id().to_string();
        self.change(&id, seq, Some(record));
    }

    pub fn remove_local(&self, id: &str, seq: u64) {
        self.change(id, seq, None);
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.items.get(id).map(|e| e.value().clone())
    }

    /// All records ordered by id
    pub fn snapshot(&self) -> Vec<T> {
        let mut records: Vec<(String, T)> = self
            .items
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records.into_iter().map(|(_, r)| r).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of full snapshot loads, including the initial one
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }
}

impl<T: Record + Clone + 'static> Default for LiveView<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Live views backing the dashboard tables
pub struct LiveViews {
    pub projects: Arc<LiveView<Project>>,
    pub deepwells: Arc<LiveView<Deepwell>>,
    pub reforestations: Arc<LiveView<Reforestation>>,
}

impl LiveViews {
    pub async fn start(store: Arc<dyn DocumentStore>) -> Result<Self> {
        Ok(Self {
            projects: LiveView::start(Arc::clone(&store)).await?,
            deepwells: LiveView::start(Arc::clone(&store)).await?,
            reforestations: LiveView::start(store).await?,
        })
    }
}
