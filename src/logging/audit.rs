//! Audit trail of writes and sign-ins, one JSON object per line

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::auth::{Claims, Role};
use crate::store::Collection;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    LoginFailed,
    Signup,
    Create,
    Update,
    Delete,
    Approve,
    Reject,
    AccessLevel,
    ClearMessages,
    ConfigUpdate,
    Export,
    Migration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub role: Role,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub collection: Option<Collection>,
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            role: Role::Viewer,
            user_id: None,
            email: None,
            collection: None,
            document_id: None,
            metadata: None,
        }
    }

    /// Attribute the event to the caller of a request
    pub fn by(mut self, claims: &Claims) -> Self {
        self.role = claims.role;
        self.user_id = Some(claims.sub.clone());
        if !claims.email.is_empty() {
            self.email = Some(claims.email.clone());
        }
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_document(mut self, collection: Collection, id: &str) -> Self {
        self.collection = Some(collection);
        self.document_id = Some(id.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Appends audit events to a file. Without a file events are dropped.
#[derive(Clone, Default)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
}

#[derive(Default)]
struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending to `path`, creating it if needed
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit logging initialized to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: AuditEvent) {
        let line = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", line) {
                error!("Failed to write audit event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        }
    }

    /// Record a create, update or delete of one document
    pub async fn log_write(
        &self,
        claims: &Claims,
        action: AuditAction,
        collection: Collection,
        id: &str,
    ) {
        self.log(AuditEvent::new(action).by(claims).with_document(collection, id))
            .await;
    }

    pub async fn log_login(&self, email: &str, success: bool) {
        let action = if success {
            AuditAction::Login
        } else {
            AuditAction::LoginFailed
        };
        self.log(AuditEvent::new(action).with_email(email)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            sub: "u1".into(),
            email: "eng@site.ph".into(),
            role: Role::Manager,
            version: 1,
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(AuditAction::Update)
            .by(&claims())
            .with_document(Collection::Projects, "p1");

        let line = event.to_jsonl().unwrap();
        assert!(line.contains("\"update\""));
        assert!(line.contains("\"projects\""));
        assert!(line.contains("MANAGER"));
        assert!(!line.contains("metadata"));
    }

    #[tokio::test]
    async fn test_writes_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let logger = AuditLogger::new();
        logger.init_file(path.clone()).await.unwrap();
        logger.log_login("eng@site.ph", false).await;
        logger
            .log_write(&claims(), AuditAction::Delete, Collection::Deepwells, "d1")
            .await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("login_failed"));
        let parsed: AuditEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.action, AuditAction::Delete);
        assert_eq!(parsed.document_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn test_without_file_is_noop() {
        let logger = AuditLogger::new();
        logger.log_login("a@b.com", true).await;
        assert!(logger.path().await.is_none());
    }
}
