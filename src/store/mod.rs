//! Document store
//!
//! Schemaless JSON documents grouped into fixed collections, keyed by the
//! entity id. Writes are full overwrites (last writer wins) and are
//! announced on a [`ChangeFeed`].
//!
//! Two backends implement [`DocumentStore`]:
//! - [`MemoryStore`] - DashMap per collection (dev mode, tests)
//! - [`MongoStore`] - one MongoDB collection per [`Collection`]

pub mod feed;
pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::db::schemas::{
    lenient, AppConfigDoc, Deepwell, MessageDoc, Project, Reforestation, UserDoc, APP_CONFIG_ID,
    CONFIG_COLLECTION, DEEPWELL_COLLECTION, MESSAGE_COLLECTION, PROJECT_COLLECTION,
    REFORESTATION_COLLECTION, USER_COLLECTION,
};
use crate::types::{Result, SitetrackError};

pub use feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// The collections the dashboard reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Projects,
    Deepwells,
    Reforestations,
    Users,
    Messages,
    Config,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Projects,
        Collection::Deepwells,
        Collection::Reforestations,
        Collection::Users,
        Collection::Messages,
        Collection::Config,
    ];

    /// Stored collection name
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Projects => PROJECT_COLLECTION,
            Collection::Deepwells => DEEPWELL_COLLECTION,
            Collection::Reforestations => REFORESTATION_COLLECTION,
            Collection::Users => USER_COLLECTION,
            Collection::Messages => MESSAGE_COLLECTION,
            Collection::Config => CONFIG_COLLECTION,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage backend for dashboard documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents in a collection
    async fn list(&self, collection: Collection) -> Result<Vec<Value>>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// Create or fully replace a document, returning the change sequence number
    async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<u64>;

    /// Sequence number of the removal, or `None` when the document did not exist
    async fn delete(&self, collection: Collection, id: &str) -> Result<Option<u64>>;

    /// Write several documents under one write lock
    async fn put_batch(&self, collection: Collection, docs: Vec<(String, Value)>) -> Result<()>;

    /// Remove several documents, returning how many existed
    async fn delete_batch(&self, collection: Collection, ids: &[String]) -> Result<usize>;

    async fn is_empty(&self, collection: Collection) -> Result<bool> {
        Ok(self.list(collection).await?.is_empty())
    }

    fn feed(&self) -> &ChangeFeed;
}

/// A typed document with a fixed home collection
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn record_id(&self) -> &str;
}

impl Record for Project {
    const COLLECTION: Collection = Collection::Projects;
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Deepwell {
    const COLLECTION: Collection = Collection::Deepwells;
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Reforestation {
    const COLLECTION: Collection = Collection::Reforestations;
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for UserDoc {
    const COLLECTION: Collection = Collection::Users;
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for MessageDoc {
    const COLLECTION: Collection = Collection::Messages;
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for AppConfigDoc {
    const COLLECTION: Collection = Collection::Config;
    fn record_id(&self) -> &str {
        APP_CONFIG_ID
    }
}

/// Decode a stored document, treating null members as absent
pub fn decode<T: DeserializeOwned>(mut value: Value) -> Result<T> {
    lenient::strip_nulls(&mut value);
    serde_json::from_value(value)
        .map_err(|e| SitetrackError::Database(format!("Malformed document: {}", e)))
}

pub async fn load<T: Record>(store: &dyn DocumentStore, id: &str) -> Result<Option<T>> {
    store
        .get(T::COLLECTION, id)
        .await?
        .map(decode)
        .transpose()
}

/// Load every record of a type, skipping documents that fail to decode
pub async fn load_all<T: Record>(store: &dyn DocumentStore) -> Result<Vec<T>> {
    let docs = store.list(T::COLLECTION).await?;
    Ok(docs
        .into_iter()
        .filter_map(|doc| match decode::<T>(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping {} document: {}", T::COLLECTION, e);
                None
            }
        })
        .collect())
}

/// Store a record, returning the change sequence number of the write
pub async fn save<T: Record>(store: &dyn DocumentStore, record: &T) -> Result<u64> {
    let value = serde_json::to_value(record)
        .map_err(|e| SitetrackError::Internal(format!("Encode failed: {}", e)))?;
    store.put(T::COLLECTION, record.record_id(), value).await
}

/// Ensure the stored document is an object carrying its id
pub(crate) fn with_id(doc: Value, id: &str) -> Result<Value> {
    match doc {
        Value::Object(mut map) => {
            map.insert("id".to_string(), Value::String(id.to_string()));
            Ok(Value::Object(map))
        }
        _ => Err(SitetrackError::BadRequest(
            "Documents must be JSON objects".into(),
        )),
    }
}

/// New random document id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
