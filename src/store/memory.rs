//! In-memory document store for dev mode and tests

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::{with_id, ChangeEvent, ChangeFeed, Collection, DocumentStore};
use crate::types::Result;

/// DashMap-backed store. Contents are lost on restart.
pub struct MemoryStore {
    collections: HashMap<Collection, DashMap<String, Value>>,
    /// Serializes write + publish so the feed matches write order
    write_lock: Mutex<()>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new(feed: ChangeFeed) -> Self {
        warn!("Document store running in memory-only mode (no MongoDB)");
        let collections = Collection::ALL
            .iter()
            .map(|c| (*c, DashMap::new()))
            .collect();
        Self {
            collections,
            write_lock: Mutex::new(()),
            feed,
        }
    }

    fn docs(&self, collection: Collection) -> &DashMap<String, Value> {
        // Every collection is created in new()
        &self.collections[&collection]
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(ChangeFeed::default())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let mut entries: Vec<(String, Value)> = self
            .docs(collection)
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, v)| v).collect())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        Ok(self.docs(collection).get(id).map(|e| e.value().clone()))
    }

    async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<u64> {
        let doc = with_id(doc, id)?;
        let _guard = self.write_lock.lock().await;
        let existed = self
            .docs(collection)
            .insert(id.to_string(), doc.clone())
            .is_some();
        Ok(self
            .feed
            .publish(ChangeEvent::upserted(collection, id, existed, doc)))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<u64>> {
        let _guard = self.write_lock.lock().await;
        let removed = self.docs(collection).remove(id).is_some();
        Ok(removed.then(|| self.feed.publish(ChangeEvent::removed(collection, id))))
    }

    async fn put_batch(&self, collection: Collection, docs: Vec<(String, Value)>) -> Result<()> {
        let docs = docs
            .into_iter()
            .map(|(id, doc)| with_id(doc, &id).map(|doc| (id, doc)))
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.write_lock.lock().await;
        for (id, doc) in docs {
            let existed = self
                .docs(collection)
                .insert(id.clone(), doc.clone())
                .is_some();
            self.feed
                .publish(ChangeEvent::upserted(collection, &id, existed, doc));
        }
        Ok(())
    }

    async fn delete_batch(&self, collection: Collection, ids: &[String]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for id in ids {
            if self.docs(collection).remove(id).is_some() {
                removed += 1;
                self.feed.publish(ChangeEvent::removed(collection, id));
            }
        }
        Ok(removed)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}
