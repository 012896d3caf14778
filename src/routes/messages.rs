//! Chat endpoints
//!
//! - `GET    /api/messages?with=` - one thread (`all` or a user id/email),
//!   or every visible message when `with` is absent
//! - `POST   /api/messages` - send, body `{"text": ..., "toId": ...}`
//! - `DELETE /api/messages/{id}` - sender hides their own message
//! - `DELETE /api/messages` - admin clears the whole collection

use chrono::{DateTime, Utc};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{
    error_from, json_response, load_existing, method_not_allowed, not_found, query_params,
    read_json, require, respond, split_id, FullBody,
};
use crate::auth::{Claims, Role};
use crate::chat::{includes_for, thread_view, ChatUser, ALL_THREAD};
use crate::db::schemas::MessageDoc;
use crate::logging::{AuditAction, AuditEvent};
use crate::server::AppState;
use crate::store::{load_all, new_id, save, Collection};
use crate::types::SitetrackError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThreadQuery {
    with: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub text: String,
    #[serde(default)]
    pub to_id: Option<String>,
}

#[derive(Serialize)]
struct ClearedResponse {
    deleted: usize,
}

pub(crate) fn chat_user(claims: &Claims) -> ChatUser {
    ChatUser::new(&claims.sub, &claims.email, claims.role == Role::Admin)
}

/// Message to store for a send request
pub fn compose(claims: &Claims, request: SendMessageRequest) -> Result<MessageDoc, SitetrackError> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err(SitetrackError::Validation("Message text is required".into()));
    }
    let to_id = request
        .to_id
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && t != ALL_THREAD);

    Ok(MessageDoc {
        id: new_id(),
        text,
        from_id: claims.sub.clone(),
        from_email: claims.email.clone(),
        to_id,
        timestamp: Utc::now(),
        deleted: false,
        deleted_by: None,
        deleted_at: None,
    })
}

async fn list_messages(
    state: &AppState,
    claims: &Claims,
    with: Option<&str>,
) -> Result<Vec<MessageDoc>, SitetrackError> {
    let me = chat_user(claims);
    let messages: Vec<MessageDoc> = load_all(state.store.as_ref()).await?;

    if let Some(thread) = with.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(thread_view(&messages, &me, thread, &state.admin_email));
    }

    let mut visible: Vec<MessageDoc> = messages
        .into_iter()
        .filter(|m| !m.deleted && includes_for(m, &me, &state.admin_email))
        .collect();
    visible.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(visible)
}

async fn send_message(
    state: &AppState,
    claims: &Claims,
    request: SendMessageRequest,
) -> Result<MessageDoc, SitetrackError> {
    let message = compose(claims, request)?;
    save(state.store.as_ref(), &message).await?;
    info!(
        "Message {} from {} to {}",
        message.id,
        message.from_email,
        message.to_id.as_deref().unwrap_or(ALL_THREAD)
    );
    Ok(message)
}

/// Soft delete; only the sender may hide a message
fn hide(mut message: MessageDoc, claims: &Claims, at: DateTime<Utc>) -> Result<MessageDoc, SitetrackError> {
    if message.from_id != claims.sub {
        return Err(SitetrackError::Forbidden(
            "Only the sender can delete a message".into(),
        ));
    }
    message.deleted = true;
    message.deleted_by = Some(claims.email.clone());
    message.deleted_at = Some(at);
    Ok(message)
}

async fn hide_message(state: &AppState, claims: &Claims, id: &str) -> Result<MessageDoc, SitetrackError> {
    let message = load_existing::<MessageDoc>(state, id).await?;
    let message = hide(message, claims, Utc::now())?;
    save(state.store.as_ref(), &message).await?;
    Ok(message)
}

async fn clear_messages(state: &AppState, claims: &Claims) -> Result<ClearedResponse, SitetrackError> {
    let ids: Vec<String> = state
        .store
        .list(Collection::Messages)
        .await?
        .iter()
        .filter_map(|doc| doc.get("id").and_then(|v| v.as_str()).map(String::from))
        .collect();
    let deleted = state.store.delete_batch(Collection::Messages, &ids).await?;

    state
        .audit
        .log(
            AuditEvent::new(AuditAction::ClearMessages)
                .by(claims)
                .with_metadata(serde_json::json!({ "deleted": deleted })),
        )
        .await;
    info!("{} messages cleared by {}", deleted, claims.email);
    Ok(ClearedResponse { deleted })
}

/// Dispatch `/api/messages*`
pub async fn handle_messages_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let subpath = path.strip_prefix("/api/messages").unwrap_or("");
    let method = req.method().clone();

    match (&method, subpath) {
        (&Method::GET, "" | "/") => {
            let claims = match require(&req, &state, "chat") {
                Ok(c) => c,
                Err(resp) => return resp,
            };
            let query: ThreadQuery = query_params(&req);
            respond(list_messages(&state, &claims, query.with.as_deref()).await)
        }
        (&Method::POST, "" | "/") => {
            let claims = match require(&req, &state, "chat") {
                Ok(c) => c,
                Err(resp) => return resp,
            };
            let body: SendMessageRequest = match read_json(req).await {
                Ok(b) => b,
                Err(resp) => return resp,
            };
            match send_message(&state, &claims, body).await {
                Ok(message) => json_response(StatusCode::CREATED, &message),
                Err(e) => error_from(e),
            }
        }
        (&Method::DELETE, "" | "/") => {
            let claims = match require(&req, &state, "clear_messages") {
                Ok(c) => c,
                Err(resp) => return resp,
            };
            respond(clear_messages(&state, &claims).await)
        }
        (_, "" | "/") => method_not_allowed(),
        (&Method::DELETE, p) => match split_id(p) {
            Some((id, None)) => {
                let claims = match require(&req, &state, "chat") {
                    Ok(c) => c,
                    Err(resp) => return resp,
                };
                respond(hide_message(&state, &claims, id).await)
            }
            _ => not_found("Message endpoint"),
        },
        _ => not_found("Message endpoint"),
    }
}
