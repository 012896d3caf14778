//! One-time import of projects exported from the old browser-only dashboard
//!
//! The file holds a JSON array of project objects. It is imported only into
//! an empty `projects` collection, in one batch, and renamed to
//! `<name>.migrated` afterwards so it is never imported twice.
//!
//! A `<name>.importing` marker is written before the batch and removed with
//! the rename. If a run fails partway the marker survives, and the next run
//! resumes the import even though some projects are already stored. Ids are
//! stable across runs, so the second batch overwrites what the first wrote.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::store::{with_id, Collection, DocumentStore};
use crate::types::{Result, SitetrackError};

/// What a migration run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No legacy file configured or present
    NoLegacyData,
    /// Projects already exist, nothing imported
    StoreNotEmpty,
    Imported(usize),
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn migrated_path(path: &Path) -> PathBuf {
    with_suffix(path, ".migrated")
}

fn marker_path(path: &Path) -> PathBuf {
    with_suffix(path, ".importing")
}

/// Documents from a legacy export, each with an id. Entries without one get
/// `legacy-<index>` so a repeated import maps to the same documents.
pub fn prepare_legacy(raw: &str) -> Result<Vec<(String, Value)>> {
    let parsed: Value = serde_json::from_str(raw)?;
    let Value::Array(items) = parsed else {
        return Err(SitetrackError::BadRequest(
            "Legacy projects file must hold a JSON array".into(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let id = item
                .get("id")
                .and_then(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_else(|| format!("legacy-{}", index));
            let doc = with_id(item, &id)?;
            Ok((id, doc))
        })
        .collect()
}

pub async fn migrate_legacy_projects(
    store: &dyn DocumentStore,
    path: Option<&Path>,
) -> Result<MigrationOutcome> {
    let Some(path) = path else {
        return Ok(MigrationOutcome::NoLegacyData);
    };
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(MigrationOutcome::NoLegacyData);
    }
    let marker = marker_path(path);
    let resuming = tokio::fs::try_exists(&marker).await.unwrap_or(false);
    if resuming {
        warn!("Resuming interrupted legacy import from {}", path.display());
    } else if !store.is_empty(Collection::Projects).await? {
        info!("Projects already present, skipping legacy import");
        return Ok(MigrationOutcome::StoreNotEmpty);
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let docs = prepare_legacy(&raw)?;
    if docs.is_empty() {
        return Ok(MigrationOutcome::NoLegacyData);
    }

    let count = docs.len();
    tokio::fs::write(&marker, b"").await?;
    store.put_batch(Collection::Projects, docs).await?;
    info!("Migrated {} legacy projects from {}", count, path.display());

    let done = migrated_path(path);
    if let Err(e) = tokio::fs::rename(path, &done).await {
        warn!("Could not rename {} after import: {}", path.display(), e);
    }
    if let Err(e) = tokio::fs::remove_file(&marker).await {
        warn!("Could not remove {}: {}", marker.display(), e);
    }
    Ok(MigrationOutcome::Imported(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{load_all, ChangeFeed, MemoryStore};
    use crate::db::schemas::Project;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose first batch write stops after one document
    struct InterruptedStore {
        inner: MemoryStore,
        interrupted: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for InterruptedStore {
        async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
            self.inner.list(collection).await
        }

        async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
            self.inner.get(collection, id).await
        }

        async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<u64> {
            self.inner.put(collection, id, doc).await
        }

        async fn delete(&self, collection: Collection, id: &str) -> Result<Option<u64>> {
            self.inner.delete(collection, id).await
        }

        async fn put_batch(&self, collection: Collection, docs: Vec<(String, Value)>) -> Result<()> {
            if self.interrupted.swap(true, Ordering::SeqCst) {
                return self.inner.put_batch(collection, docs).await;
            }
            if let Some((id, doc)) = docs.into_iter().next() {
                self.inner.put(collection, &id, doc).await?;
            }
            Err(SitetrackError::Database("connection reset".into()))
        }

        async fn delete_batch(&self, collection: Collection, ids: &[String]) -> Result<usize> {
            self.inner.delete_batch(collection, ids).await
        }

        fn feed(&self) -> &ChangeFeed {
            self.inner.feed()
        }
    }

    #[test]
    fn test_prepare_assigns_missing_ids() {
        let docs = prepare_legacy(r#"[{"id":"old-1","name":"A"},{"name":"B"},{"id":7}]"#).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].0, "old-1");
        assert_eq!(docs[1].0, "legacy-1");
        assert_eq!(docs[1].1["id"], "legacy-1");
        assert_eq!(docs[2].0, "7");
    }

    #[test]
    fn test_prepare_rejects_non_array() {
        assert!(prepare_legacy(r#"{"name":"A"}"#).is_err());
        assert!(prepare_legacy(r#"[1, 2]"#).is_err());
    }

    #[tokio::test]
    async fn test_imports_once_into_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        std::fs::write(&path, r#"[{"name":"Bridge","contractor":"ACME"},{"name":"Road"}]"#).unwrap();

        let store = MemoryStore::default();
        let outcome = migrate_legacy_projects(&store, Some(&path)).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Imported(2));

        let projects: Vec<Project> = load_all(&store).await.unwrap();
        assert_eq!(projects.len(), 2);
        assert!(!path.exists());
        assert!(migrated_path(&path).exists());
        assert!(!marker_path(&path).exists());

        std::fs::write(&path, r#"[{"name":"Again"}]"#).unwrap();
        let outcome = migrate_legacy_projects(&store, Some(&path)).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::StoreNotEmpty);
    }

    #[tokio::test]
    async fn test_interrupted_import_resumes_on_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        std::fs::write(&path, r#"[{"id":"p1","name":"Bridge"},{"name":"Road"},{"name":"Dike"}]"#).unwrap();

        let store = InterruptedStore {
            inner: MemoryStore::default(),
            interrupted: AtomicBool::new(false),
        };
        assert!(migrate_legacy_projects(&store, Some(&path)).await.is_err());
        assert_eq!(store.list(Collection::Projects).await.unwrap().len(), 1);
        assert!(path.exists());
        assert!(marker_path(&path).exists());

        let outcome = migrate_legacy_projects(&store, Some(&path)).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Imported(3));

        let mut names: Vec<String> = load_all::<Project>(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["Bridge", "Dike", "Road"]);
        assert!(migrated_path(&path).exists());
        assert!(!marker_path(&path).exists());
    }

    #[tokio::test]
    async fn test_without_file() {
        let store = MemoryStore::default();
        assert_eq!(
            migrate_legacy_projects(&store, None).await.unwrap(),
            MigrationOutcome::NoLegacyData
        );
        let missing = PathBuf::from("/nonexistent/legacy.json");
        assert_eq!(
            migrate_legacy_projects(&store, Some(&missing)).await.unwrap(),
            MigrationOutcome::NoLegacyData
        );
    }
}
