//! HTTP server implementation
//!
//! Routes:
//! - `/health` - liveness and counts
//! - `/auth/*` - signup, login, view-only sessions
//! - `/api/*` - dashboard collections, chat and config
//! - `/ws` - change feed WebSocket

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::export::Exporter;
use crate::logging::AuditLogger;
use crate::routes::{self, FullBody};
use crate::store::DocumentStore;
use crate::sync::LiveViews;
use crate::types::{Result, SitetrackError};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn DocumentStore>,
    /// Live read models for the dashboard tables
    pub views: LiveViews,
    pub jwt: JwtValidator,
    /// Lowercased administrator email
    pub admin_email: String,
    pub audit: AuditLogger,
    pub exporter: Exporter,
    pub started_at: Instant,
}

impl AppState {
    /// Build the state and start the live views over `store`
    pub async fn new(args: Args, store: Arc<dyn DocumentStore>) -> Result<Self> {
        let jwt = match args.jwt_secret.clone() {
            Some(secret) => JwtValidator::new(secret, args.jwt_expiry_seconds)?,
            None if args.dev_mode => JwtValidator::new_dev(),
            None => {
                return Err(SitetrackError::Config(
                    "JWT_SECRET is required in production mode".into(),
                ))
            }
        };
        let admin_email = args
            .admin_email()
            .ok_or_else(|| SitetrackError::Config("ADMIN_EMAIL is required".into()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(args.request_timeout_ms))
            .build()?;

        let views = LiveViews::start(Arc::clone(&store)).await?;

        Ok(Self {
            args,
            store,
            views,
            jwt,
            admin_email,
            audit: AuditLogger::new(),
            exporter: Exporter::new(http),
            started_at: Instant::now(),
        })
    }

    /// Replace the audit logger, e.g. one writing to a file
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }
}

/// Bind the configured address and serve until the process exits
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("sitetrack listening on http://{}", state.args.listen);
    serve(listener, state).await
}

/// Accept connections on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = Arc::clone(&state);
                handle_request(state, addr, req)
            });

            if let Err(err) = http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                debug!("Connection error from {}: {}", addr, err);
            }
        });
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    if method == Method::OPTIONS {
        return Ok(to_boxed(preflight_response()));
    }

    let response = match path.as_str() {
        "/health" | "/healthz" if method == Method::GET => routes::health_check(&state),
        "/ws" => routes::handle_changes_ws(state, req).await,
        p if p.starts_with("/auth/") => routes::handle_auth_request(req, state, p).await,
        p if p == "/api/projects" || p.starts_with("/api/projects/") => {
            routes::handle_projects_request(req, state, p).await
        }
        p if p == "/api/deepwells" || p.starts_with("/api/deepwells/") => {
            routes::handle_deepwells_request(req, state, p).await
        }
        p if p == "/api/reforestations" || p.starts_with("/api/reforestations/") => {
            routes::handle_reforestations_request(req, state, p).await
        }
        p if p == "/api/users" || p.starts_with("/api/users/") => {
            routes::handle_users_request(req, state, p).await
        }
        p if p == "/api/messages" || p.starts_with("/api/messages/") => {
            routes::handle_messages_request(req, state, p).await
        }
        "/api/config" => routes::handle_config_request(req, state).await,
        _ => not_found_response(&path),
    };

    if response.status().is_server_error() {
        error!("[{}] {} {} -> {}", addr, method, path, response.status());
    }
    Ok(to_boxed(response))
}

/// Convert a `Full<Bytes>` response to a boxed body
fn to_boxed(response: Response<FullBody>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

fn preflight_response() -> Response<FullBody> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition, X-Export-Fallback"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

fn not_found_response(path: &str) -> Response<FullBody> {
    routes::error_response(
        StatusCode::NOT_FOUND,
        &format!("No route for {}", path),
        Some("NOT_FOUND"),
    )
}
