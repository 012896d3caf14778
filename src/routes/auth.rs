//! Authentication endpoints
//!
//! - `POST /auth/signup` - create an account awaiting approval
//! - `POST /auth/login` - exchange credentials for a JWT
//! - `POST /auth/view-only` - anonymous read-only session
//! - `GET  /auth/me` - identity behind the current token

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{authenticate, error_from, json_response, method_not_allowed, not_found, read_json, FullBody};
use crate::auth::accounts::{self, role_for};
use crate::auth::{LoginRequest, Role, SignupRequest, TokenInput};
use crate::db::schemas::{UserDoc, UserSummary};
use crate::logging::{AuditAction, AuditEvent};
use crate::server::AppState;
use crate::types::SitetrackError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub user: UserSummary,
    pub message: &'static str,
    /// Present when the account was approved on creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub view_only: bool,
    pub elevated: bool,
}

fn issue_token(state: &AppState, user_id: &str, email: &str, role: Role) -> Result<AuthResponse, SitetrackError> {
    let token = state.jwt.generate_token(TokenInput {
        user_id: user_id.to_string(),
        email: email.to_string(),
        role,
    })?;
    Ok(AuthResponse {
        token,
        user_id: user_id.to_string(),
        email: email.to_string(),
        role,
        expires_in: state.jwt.expiry_seconds(),
    })
}

async fn handle_signup(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let body: SignupRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let user: UserDoc = match accounts::signup(state.store.as_ref(), &state.admin_email, body).await {
        Ok(u) => u,
        Err(e) => return error_from(e),
    };

    state
        .audit
        .log(AuditEvent::new(AuditAction::Signup).with_email(&user.email))
        .await;

    let (message, token) = if user.approved {
        let role = role_for(&user, &state.admin_email);
        match issue_token(&state, &user.id, &user.email, role) {
            Ok(auth) => ("Account created", Some(auth.token)),
            Err(e) => return error_from(e),
        }
    } else {
        ("Account created. An administrator must approve it before you can log in", None)
    };

    json_response(
        StatusCode::CREATED,
        &SignupResponse {
            user: UserSummary::from(&user),
            message,
            token,
        },
    )
}

async fn handle_login(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let body: LoginRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let email = body.email.trim().to_lowercase();

    match accounts::login(state.store.as_ref(), &state.admin_email, body).await {
        Ok((user, role)) => {
            state.audit.log_login(&user.email, true).await;
            info!("Login: {} as {}", user.email, role);
            match issue_token(&state, &user.id, &user.email, role) {
                Ok(auth) => json_response(StatusCode::OK, &auth),
                Err(e) => error_from(e),
            }
        }
        Err(e) => {
            state.audit.log_login(&email, false).await;
            warn!("Login failed for {}: {}", email, e);
            error_from(e)
        }
    }
}

async fn handle_view_only(state: Arc<AppState>) -> Response<FullBody> {
    let viewer_id = format!("viewer-{}", uuid::Uuid::new_v4());
    match issue_token(&state, &viewer_id, "", Role::Viewer) {
        Ok(auth) => {
            info!("View-only session {}", viewer_id);
            json_response(StatusCode::OK, &auth)
        }
        Err(e) => error_from(e),
    }
}

fn handle_me(req: &Request<Incoming>, state: &AppState) -> Response<FullBody> {
    let claims = match authenticate(req, state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    json_response(
        StatusCode::OK,
        &MeResponse {
            view_only: claims.is_viewer(),
            elevated: claims.role.is_elevated(),
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        },
    )
}

/// Dispatch `/auth/*`
pub async fn handle_auth_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    match (req.method().clone(), path) {
        (Method::POST, "/auth/signup") => handle_signup(req, state).await,
        (Method::POST, "/auth/login") => handle_login(req, state).await,
        (Method::POST, "/auth/view-only") => handle_view_only(state).await,
        (Method::GET, "/auth/me") => handle_me(&req, &state),
        (_, "/auth/signup") | (_, "/auth/login") | (_, "/auth/view-only") | (_, "/auth/me") => {
            method_not_allowed()
        }
        _ => not_found("Auth endpoint"),
    }
}
