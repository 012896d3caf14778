//! Live change feed over WebSocket
//!
//! ## Protocol
//!
//! Connect: `ws://host/ws?token=<jwt>` (or an `Authorization` header)
//!
//! Messages (server → client):
//! - `snapshot` - current projects, deepwells and, for members,
//!   reforestations and visible messages
//! - `change` - one document added, modified or removed
//! - `message` / `message_removed` - chat updates visible to this session
//! - `unread` - unread counts per thread after any chat change
//! - `thread` - messages of a thread just opened
//! - `pong`, `error`
//!
//! Messages (client → server):
//! - `open_thread` - `{"type": "open_thread", "thread": "all" | <user>}`
//! - `close_messenger` - stop marking new messages as read
//! - `ping`
//!
//! View-only sessions only receive project and deepwell changes.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::messages::chat_user;
use super::{error_response, get_auth_header, FullBody};
use crate::auth::{extract_token_from_header, extract_token_from_query, is_operation_allowed, Claims, Role};
use crate::chat::{Inbox, InboxChange};
use crate::db::schemas::{Deepwell, MessageDoc, Project, Reforestation, UserDoc, UserSummary};
use crate::server::AppState;
use crate::store::{decode, load_all, ChangeEvent, ChangeKind, Collection};
use crate::tracking::{derive_status, today};
use crate::types::SitetrackError;

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

// ============================================================================
// Message Types
// ============================================================================

/// Message sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Snapshot {
        timestamp: String,
        role: Role,
        projects: Vec<Value>,
        deepwells: Vec<Deepwell>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reforestations: Option<Vec<Reforestation>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<MessageDoc>>,
    },
    Change {
        collection: Collection,
        kind: ChangeKind,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        doc: Option<Value>,
    },
    Message {
        message: MessageDoc,
    },
    MessageRemoved {
        id: String,
    },
    Unread {
        counts: HashMap<String, u32>,
        total: u32,
    },
    Thread {
        thread: String,
        messages: Vec<MessageDoc>,
    },
    Pong {
        timestamp: String,
    },
    Error {
        message: String,
    },
}

/// Message received from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    OpenThread { thread: String },
    CloseMessenger,
    Ping,
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Project document with its derived status attached
fn project_with_status(project: &Project) -> Value {
    let mut value = serde_json::to_value(project).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert(
            "status".to_string(),
            Value::String(derive_status(project, today()).as_str().to_string()),
        );
    }
    value
}

// ============================================================================
// Session
// ============================================================================

/// Per-connection filtering of the change feed
pub struct FeedSession {
    role: Role,
    inbox: Option<Inbox>,
}

impl FeedSession {
    pub fn new(claims: &Claims, admin_email: &str) -> Self {
        let inbox = is_operation_allowed("chat", claims.role)
            .then(|| Inbox::new(chat_user(claims), admin_email));
        Self {
            role: claims.role,
            inbox,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Replace the chat state with a fresh message list
    pub fn seed_messages(&mut self, messages: Vec<MessageDoc>) {
        if let Some(inbox) = self.inbox.as_mut() {
            inbox.seed(messages);
        }
    }

    fn sees(&self, collection: Collection) -> bool {
        match collection {
            Collection::Projects | Collection::Deepwells => true,
            Collection::Reforestations => is_operation_allowed("read_reforestations", self.role),
            Collection::Users => is_operation_allowed("manage_users", self.role),
            Collection::Messages | Collection::Config => false,
        }
    }

    fn unread(&self) -> Option<FeedMessage> {
        self.inbox.as_ref().map(|inbox| FeedMessage::Unread {
            counts: inbox.unread().clone(),
            total: inbox.total_unread(),
        })
    }

    /// Messages to send for one feed event
    pub fn on_event(&mut self, event: &ChangeEvent) -> Vec<FeedMessage> {
        if event.collection == Collection::Messages {
            let Some(inbox) = self.inbox.as_mut() else {
                return Vec::new();
            };
            let update = match inbox.apply(event) {
                InboxChange::None => return Vec::new(),
                InboxChange::Upserted(message) => FeedMessage::Message { message },
                InboxChange::Removed(id) => FeedMessage::MessageRemoved { id },
            };
            return std::iter::once(update).chain(self.unread()).collect();
        }

        if !self.sees(event.collection) {
            return Vec::new();
        }

        let doc = event.doc.clone().and_then(|doc| match event.collection {
            Collection::Projects => decode::<Project>(doc).ok().map(|p| project_with_status(&p)),
            // Never forward password hashes
            Collection::Users => decode::<UserDoc>(doc)
                .ok()
                .and_then(|u| serde_json::to_value(UserSummary::from(&u)).ok()),
            _ => Some(doc),
        });

        vec![FeedMessage::Change {
            collection: event.collection,
            kind: event.kind,
            id: event.id.clone(),
            doc,
        }]
    }

    pub fn on_client(&mut self, msg: ClientMessage) -> Vec<FeedMessage> {
        match msg {
            ClientMessage::Ping => vec![FeedMessage::Pong { timestamp: now_iso() }],
            ClientMessage::OpenThread { thread } => match self.inbox.as_mut() {
                Some(inbox) => {
                    let messages = inbox.open(&thread);
                    std::iter::once(FeedMessage::Thread { thread, messages })
                        .chain(self.unread())
                        .collect()
                }
                None => vec![FeedMessage::Error {
                    message: "Chat is not available in view-only mode".into(),
                }],
            },
            ClientMessage::CloseMessenger => {
                if let Some(inbox) = self.inbox.as_mut() {
                    inbox.close();
                }
                Vec::new()
            }
        }
    }

    /// Current state for a newly connected (or resynced) client
    pub fn snapshot(&self, state: &AppState) -> FeedMessage {
        let reforestations = self
            .sees(Collection::Reforestations)
            .then(|| state.views.reforestations.snapshot());
        FeedMessage::Snapshot {
            timestamp: now_iso(),
            role: self.role,
            projects: state
                .views
                .projects
                .snapshot()
                .iter()
                .map(project_with_status)
                .collect(),
            deepwells: state.views.deepwells.snapshot(),
            reforestations,
            messages: self.inbox.as_ref().map(|inbox| inbox.messages().to_vec()),
        }
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

fn claims_for(req: &Request<Incoming>, state: &AppState) -> Option<Claims> {
    let token = extract_token_from_query(req.uri().query(), "token")
        .or_else(|| extract_token_from_header(get_auth_header(req)).map(String::from))?;
    let result = state.jwt.verify_token(&token);
    result.claims.filter(|_| result.valid)
}

/// Handle WebSocket upgrade for the change feed
pub async fn handle_changes_ws(state: Arc<AppState>, req: Request<Incoming>) -> Response<FullBody> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "WebSocket upgrade required",
            Some("BAD_REQUEST"),
        );
    }

    let Some(claims) = claims_for(&req, &state) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid token",
            Some("UNAUTHORIZED"),
        );
    };

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "WebSocket upgrade failed",
                Some("WEBSOCKET_ERROR"),
            );
        }
    };

    // Subscribe before the snapshot so no write falls between the two
    let rx = state.store.feed().subscribe();
    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = handle_feed_connection(ws, state, claims, rx).await {
                    warn!("Change feed WebSocket error: {}", e);
                }
            }
            Err(e) => error!("WebSocket connection failed: {}", e),
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

type FeedSink = SplitSink<HyperWebSocket, WsMessage>;

async fn send_json(sender: &mut FeedSink, msg: &FeedMessage) -> Result<(), SitetrackError> {
    let json = serde_json::to_string(msg)?;
    sender
        .send(WsMessage::Text(json))
        .await
        .map_err(SitetrackError::from)
}

async fn seed(session: &mut FeedSession, state: &AppState) -> Result<(), SitetrackError> {
    if session.inbox.is_some() {
        let messages: Vec<MessageDoc> = load_all(state.store.as_ref()).await?;
        session.seed_messages(messages);
    }
    Ok(())
}

/// Handle an individual change feed connection
async fn handle_feed_connection(
    ws: HyperWebSocket,
    state: Arc<AppState>,
    claims: Claims,
    mut rx: broadcast::Receiver<ChangeEvent>,
) -> Result<(), SitetrackError> {
    let (mut sender, mut receiver) = ws.split();
    info!("Change feed client connected: {} ({})", claims.sub, claims.role);

    let mut session = FeedSession::new(&claims, &state.admin_email);
    seed(&mut session, &state).await?;
    send_json(&mut sender, &session.snapshot(&state)).await?;
    if let Some(unread) = session.unread() {
        send_json(&mut sender, &unread).await?;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        for msg in session.on_event(&event) {
                            send_json(&mut sender, &msg).await?;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Change feed client {} lagged by {} events, resending snapshot", claims.sub, skipped);
                        seed(&mut session, &state).await?;
                        send_json(&mut sender, &session.snapshot(&state)).await?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        debug!("Received from feed client: {}", text);
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => session.on_client(client_msg),
                            Err(e) => vec![FeedMessage::Error { message: format!("Unknown message: {}", e) }],
                        };
                        for reply in replies {
                            send_json(&mut sender, &reply).await?;
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        sender
                            .send(WsMessage::Pong(data))
                            .await?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Change feed client disconnected: {}", claims.sub);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Change feed receive error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn claims(sub: &str, role: Role) -> Claims {
        Claims {
            sub: sub.into(),
            email: format!("{}@site.ph", sub),
            role,
            version: 1,
            iat: 0,
            exp: u64::MAX,
        }
    }

    fn message_event(id: &str, from: &str, to: Option<&str>) -> ChangeEvent {
        let msg = MessageDoc {
            id: id.into(),
            text: "hello".into(),
            from_id: from.into(),
            from_email: format!("{}@site.ph", from),
            to_id: to.map(String::from),
            timestamp: Utc::now(),
            deleted: false,
            deleted_by: None,
            deleted_at: None,
        };
        ChangeEvent::upserted(Collection::Messages, id, false, serde_json::to_value(msg).unwrap())
    }

    #[test]
    fn test_viewer_only_sees_projects_and_deepwells() {
        let mut session = FeedSession::new(&claims("viewer-1", Role::Viewer), "admin@site.ph");
        let refo = ChangeEvent::upserted(
            Collection::Reforestations,
            "r1",
            false,
            serde_json::json!({"id": "r1", "activityName": "Mangroves"}),
        );
        assert!(session.on_event(&refo).is_empty());
        assert!(session.on_event(&message_event("m1", "u2", None)).is_empty());

        let project = ChangeEvent::upserted(
            Collection::Projects,
            "p1",
            false,
            serde_json::json!({"id": "p1", "name": "Seawall"}),
        );
        let out = session.on_event(&project);
        assert_eq!(out.len(), 1);
        let json = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(json["type"], "change");
        assert_eq!(json["kind"], "added");
        assert_eq!(json["doc"]["status"], "On-going");
    }

    #[test]
    fn test_member_gets_message_and_unread() {
        let mut session = FeedSession::new(&claims("u1", Role::Member), "admin@site.ph");
        session.seed_messages(Vec::new());

        let out = session.on_event(&message_event("m1", "u2", Some("u1")));
        assert_eq!(out.len(), 2);
        let unread = serde_json::to_value(&out[1]).unwrap();
        assert_eq!(unread["type"], "unread");
        assert_eq!(unread["counts"]["u2"], 1);

        let out = session.on_client(ClientMessage::OpenThread { thread: "u2".into() });
        let thread = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(thread["type"], "thread");
        assert_eq!(thread["messages"].as_array().unwrap().len(), 1);
        let unread = serde_json::to_value(&out[1]).unwrap();
        assert_eq!(unread["total"], 0);
    }

    #[test]
    fn test_user_changes_hide_password_hash() {
        let mut session = FeedSession::new(&claims("admin", Role::Admin), "admin@site.ph");
        let user = UserDoc::new("u9".into(), "new@site.ph", "argon-hash".into());
        let event = ChangeEvent::upserted(
            Collection::Users,
            "u9",
            false,
            serde_json::to_value(&user).unwrap(),
        );
        let out = session.on_event(&event);
        let json = serde_json::to_string(&out[0]).unwrap();
        assert!(!json.contains("argon-hash"));
        assert!(json.contains("new@site.ph"));

        let member = FeedSession::new(&claims("u1", Role::Member), "admin@site.ph");
        assert!(!member.sees(Collection::Users));
    }

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"open_thread","thread":"all"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::OpenThread { .. }));
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        let mut session = FeedSession::new(&claims("viewer-1", Role::Viewer), "admin@site.ph");
        let out = session.on_client(msg);
        assert!(matches!(out[0], FeedMessage::Pong { .. }));
        let out = session.on_client(ClientMessage::OpenThread { thread: "all".into() });
        assert!(matches!(out[0], FeedMessage::Error { .. }));
    }
}
