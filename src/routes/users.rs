//! User management endpoints
//!
//! - `GET  /api/users/contacts` - approved users for the chat list (members)
//! - `GET  /api/users?status=pending|approved` - admin
//! - `POST /api/users/{id}/approve` - admin
//! - `POST /api/users/{id}/reject` - admin, deletes the account
//! - `PUT  /api/users/{id}/access-level` - admin, body `{"accessLevel": 1|2}`

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{
    error_from, json_response, method_not_allowed, not_found, query_params, read_json, require,
    respond, split_id, FullBody,
};
use crate::auth::accounts;
use crate::db::schemas::UserSummary;
use crate::logging::{AuditAction, AuditEvent};
use crate::server::AppState;
use crate::store::Collection;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserListQuery {
    status: Option<String>,
}

impl UserListQuery {
    fn approved(&self) -> Option<bool> {
        match self.status.as_deref().map(str::trim) {
            Some("pending") => Some(false),
            Some("approved") => Some(true),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessLevelRequest {
    access_level: u8,
}

#[derive(Serialize)]
struct RejectedResponse {
    rejected: bool,
    id: String,
}

async fn handle_approve(req: Request<Incoming>, state: Arc<AppState>, id: &str) -> Response<FullBody> {
    let claims = match require(&req, &state, "manage_users") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match accounts::approve(state.store.as_ref(), id).await {
        Ok(user) => {
            state
                .audit
                .log(
                    AuditEvent::new(AuditAction::Approve)
                        .by(&claims)
                        .with_document(Collection::Users, id),
                )
                .await;
            info!("User {} approved by {}", user.email, claims.email);
            json_response(StatusCode::OK, &UserSummary::from(&user))
        }
        Err(e) => error_from(e),
    }
}

async fn handle_reject(req: Request<Incoming>, state: Arc<AppState>, id: &str) -> Response<FullBody> {
    let claims = match require(&req, &state, "manage_users") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match accounts::reject(state.store.as_ref(), id).await {
        Ok(()) => {
            state
                .audit
                .log(
                    AuditEvent::new(AuditAction::Reject)
                        .by(&claims)
                        .with_document(Collection::Users, id),
                )
                .await;
            json_response(
                StatusCode::OK,
                &RejectedResponse {
                    rejected: true,
                    id: id.to_string(),
                },
            )
        }
        Err(e) => error_from(e),
    }
}

async fn handle_access_level(
    req: Request<Incoming>,
    state: Arc<AppState>,
    id: &str,
) -> Response<FullBody> {
    let claims = match require(&req, &state, "manage_users") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let body: AccessLevelRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match accounts::set_access_level(state.store.as_ref(), id, body.access_level).await {
        Ok(user) => {
            state
                .audit
                .log(
                    AuditEvent::new(AuditAction::AccessLevel)
                        .by(&claims)
                        .with_document(Collection::Users, id)
                        .with_metadata(serde_json::json!({ "accessLevel": user.access_level })),
                )
                .await;
            info!("User {} set to access level {}", user.email, user.access_level);
            json_response(StatusCode::OK, &UserSummary::from(&user))
        }
        Err(e) => error_from(e),
    }
}

/// Dispatch `/api/users*`
pub async fn handle_users_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let subpath = path.strip_prefix("/api/users").unwrap_or("");
    let method = req.method().clone();

    match (&method, subpath) {
        (&Method::GET, "/contacts") => {
            let claims = match require(&req, &state, "read_contacts") {
                Ok(c) => c,
                Err(resp) => return resp,
            };
            respond(accounts::contacts(state.store.as_ref(), &claims.sub).await)
        }
        (&Method::GET, "" | "/") => {
            if let Err(resp) = require(&req, &state, "manage_users") {
                return resp;
            }
            let query: UserListQuery = query_params(&req);
            respond(accounts::list_users(state.store.as_ref(), query.approved()).await)
        }
        (_, "" | "/" | "/contacts") => method_not_allowed(),
        (_, p) => match (split_id(p), &method) {
            (Some((id, Some("approve"))), &Method::POST) => handle_approve(req, state, id).await,
            (Some((id, Some("reject"))), &Method::POST) => handle_reject(req, state, id).await,
            (Some((id, Some("access-level"))), &Method::PUT) => {
                handle_access_level(req, state, id).await
            }
            (Some((_, Some("approve" | "reject" | "access-level"))), _) => method_not_allowed(),
            _ => not_found("User endpoint"),
        },
    }
}
