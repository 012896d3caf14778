//! Configuration for sitetrack
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// sitetrack - project, deepwell and reforestation tracking service
#[derive(Parser, Debug, Clone)]
#[command(name = "sitetrack")]
#[command(about = "Tracking dashboard backend with report export and chat")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store when MongoDB is unreachable, dev JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "sitetrack")]
    pub mongodb_db: String,

    /// Keep all data in memory, never connect to MongoDB
    #[arg(long, env = "MEMORY_STORE", default_value = "false")]
    pub memory_store: bool,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Email of the administrator account
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Append audit events (JSONL) to this file
    #[arg(long, env = "AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// DOCX report template, either a file path or an http(s) URL
    #[arg(long, env = "DOCX_TEMPLATE_URL")]
    pub docx_template_url: Option<String>,

    /// Directory that relative template candidates are resolved against
    #[arg(long, env = "ASSETS_ROOT", default_value = ".")]
    pub assets_root: PathBuf,

    /// DOCX to PDF conversion endpoint
    #[arg(long, env = "PDF_ENDPOINT")]
    pub pdf_endpoint: Option<String>,

    /// Conversion endpoint type: gotenberg or raw (auto-detected from the URL when unset)
    #[arg(long, env = "PDF_ENDPOINT_TYPE")]
    pub pdf_endpoint_type: Option<String>,

    /// Timeout for outbound HTTP requests in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Legacy projects JSON file imported once into an empty store
    #[arg(long, env = "LEGACY_PROJECTS")]
    pub legacy_projects: Option<PathBuf>,

    /// Capacity of the change feed broadcast channel
    #[arg(long, env = "CHANGE_FEED_CAPACITY", default_value = "1024")]
    pub change_feed_capacity: usize,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-mode-secret-not-for-production-use-123456".to_string()),
            (None, false) => None,
        }
    }

    /// Normalized admin email
    pub fn admin_email(&self) -> Option<String> {
        self.admin_email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if let Some(ref secret) = self.jwt_secret {
            if secret.len() < 32 {
                return Err("JWT_SECRET must be at least 32 characters".to_string());
            }
        }

        if self.admin_email().is_none() {
            return Err("ADMIN_EMAIL is required".to_string());
        }

        if let Some(ref kind) = self.pdf_endpoint_type {
            if !matches!(kind.to_lowercase().as_str(), "gotenberg" | "raw") {
                return Err(format!("PDF_ENDPOINT_TYPE must be gotenberg or raw, got {}", kind));
            }
        }

        if self.change_feed_capacity == 0 {
            return Err("CHANGE_FEED_CAPACITY must be greater than zero".to_string());
        }

        Ok(())
    }
}
