//! Health check endpoint
//!
//! `/health` and `/healthz` report liveness plus the size of each live view,
//! which shows whether the initial snapshot loaded.

use hyper::{Response, StatusCode};
use serde::Serialize;

use super::{json_response, FullBody};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since startup
    pub uptime: u64,
    pub timestamp: String,
    pub mode: &'static str,
    pub views: ViewCounts,
    /// Open change feed subscriptions (live views and WebSocket sessions)
    pub feed_subscribers: usize,
}

#[derive(Serialize)]
pub struct ViewCounts {
    pub projects: usize,
    pub deepwells: usize,
    pub reforestations: usize,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode { "development" } else { "production" },
        views: ViewCounts {
            projects: state.views.projects.len(),
            deepwells: state.views.deepwells.len(),
            reforestations: state.views.reforestations.len(),
        },
        feed_subscribers: state.store.feed().receiver_count(),
    }
}

pub fn health_check(state: &AppState) -> Response<FullBody> {
    json_response(StatusCode::OK, &build_health_response(state))
}
