//! MongoDB-backed document store
//!
//! Each collection maps to a MongoDB collection of the same name. The
//! entity id doubles as `_id`, so a save is a `replace_one` with upsert.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::{with_id, ChangeEvent, ChangeFeed, Collection, DocumentStore};
use crate::db::MongoClient;
use crate::types::{Result, SitetrackError};

pub struct MongoStore {
    mongo: MongoClient,
    write_lock: Mutex<()>,
    feed: ChangeFeed,
}

impl MongoStore {
    pub fn new(mongo: MongoClient, feed: ChangeFeed) -> Self {
        info!(
            "Document store backed by MongoDB database '{}'",
            mongo.db_name()
        );
        Self {
            mongo,
            write_lock: Mutex::new(()),
            feed,
        }
    }

    fn collection(&self, collection: Collection) -> mongodb::Collection<Document> {
        self.mongo.documents(collection.name())
    }

    async fn replace(&self, collection: Collection, id: &str, doc: Value) -> Result<bool> {
        let stored = to_document(id, &doc)?;
        let result = self
            .collection(collection)
            .replace_one(doc! { "_id": id }, stored)
            .upsert(true)
            .await
            .map_err(|e| SitetrackError::Database(format!("Replace failed: {}", e)))?;
        Ok(result.upserted_id.is_none())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let cursor = self
            .collection(collection)
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .await
            .map_err(|e| SitetrackError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<Value> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(to_value(d)),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let found = self
            .collection(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| SitetrackError::Database(format!("Find failed: {}", e)))?;
        Ok(found.map(to_value))
    }

    async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<u64> {
        let doc = with_id(doc, id)?;
        let _guard = self.write_lock.lock().await;
        let existed = self.replace(collection, id, doc.clone()).await?;
        Ok(self
            .feed
            .publish(ChangeEvent::upserted(collection, id, existed, doc)))
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<u64>> {
        let _guard = self.write_lock.lock().await;
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| SitetrackError::Database(format!("Delete failed: {}", e)))?;
        let removed = result.deleted_count > 0;
        Ok(removed.then(|| self.feed.publish(ChangeEvent::removed(collection, id))))
    }

    async fn put_batch(&self, collection: Collection, docs: Vec<(String, Value)>) -> Result<()> {
        let docs = docs
            .into_iter()
            .map(|(id, doc)| with_id(doc, &id).map(|doc| (id, doc)))
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.write_lock.lock().await;
        for (id, doc) in docs {
            let existed = self.replace(collection, &id, doc.clone()).await?;
            self.feed
                .publish(ChangeEvent::upserted(collection, &id, existed, doc));
        }
        Ok(())
    }

    async fn delete_batch(&self, collection: Collection, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let existing: Vec<String> = {
            let cursor = self
                .collection(collection)
                .find(doc! { "_id": { "$in": ids.to_vec() } })
                .projection(doc! { "_id": 1 })
                .await
                .map_err(|e| SitetrackError::Database(format!("Find failed: {}", e)))?;
            cursor
                .filter_map(|doc| async move {
                    doc.ok()
                        .and_then(|d| d.get_str("_id").ok().map(str::to_string))
                })
                .collect()
                .await
        };

        self.collection(collection)
            .delete_many(doc! { "_id": { "$in": existing.clone() } })
            .await
            .map_err(|e| SitetrackError::Database(format!("Delete failed: {}", e)))?;

        for id in &existing {
            self.feed.publish(ChangeEvent::removed(collection, id));
        }
        Ok(existing.len())
    }

    async fn is_empty(&self, collection: Collection) -> Result<bool> {
        let count = self
            .collection(collection)
            .estimated_document_count()
            .await
            .map_err(|e| SitetrackError::Database(format!("Count failed: {}", e)))?;
        Ok(count == 0)
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

/// JSON document to BSON with `_id` set to the entity id
fn to_document(id: &str, value: &Value) -> Result<Document> {
    let mut document = bson::to_document(value)?;
    document.insert("_id", id);
    Ok(document)
}

/// BSON document to plain JSON, dropping `_id`
fn to_value(mut document: Document) -> Value {
    let id = document.remove("_id");
    let mut value = Bson::Document(document).into_relaxed_extjson();
    if let (Value::Object(map), Some(Bson::String(id))) = (&mut value, id) {
        map.entry("id").or_insert(Value::String(id));
    }
    value
}
