//! sitetrack - tracking dashboard backend
//!
//! Serves the construction project, deepwell and reforestation tables of a
//! provincial monitoring dashboard, exports project reports to DOCX/PDF and
//! carries a small chat between approved users.
//!
//! ## Services
//!
//! - **Store**: documents in MongoDB (or in memory) with a live change feed
//! - **Views**: in-process mirrors of the three dashboard tables
//! - **Export**: DOCX template rendering with optional PDF conversion
//! - **Chat**: broadcast and private threads with unread counts
//! - **Auth**: signup with admin approval, JWT sessions, view-only access

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod migration;
pub mod photos;
pub mod routes;
pub mod server;
pub mod store;
pub mod sync;
pub mod tracking;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, SitetrackError};
