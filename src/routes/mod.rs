//! HTTP routes for sitetrack
//!
//! Every handler returns `Response<FullBody>`; the server boxes them.
//! Shared helpers for JSON bodies, errors and token checks live here.

pub mod auth;
pub mod changes;
pub mod config;
pub mod deepwells;
pub mod health;
pub mod messages;
pub mod projects;
pub mod reforestations;
pub mod users;

pub use auth::handle_auth_request;
pub use changes::handle_changes_ws;
pub use config::handle_config_request;
pub use deepwells::handle_deepwells_request;
pub use health::health_check;
pub use messages::handle_messages_request;
pub use projects::handle_projects_request;
pub use reforestations::handle_reforestations_request;
pub use users::handle_users_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::auth::{extract_token_from_header, is_operation_allowed, Claims};
use crate::server::AppState;
use crate::store::{load, Record};
use crate::types::SitetrackError;

pub type FullBody = Full<Bytes>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<FullBody> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    with_body(status, "application/json", Bytes::from(json))
}

pub fn error_response(status: StatusCode, error: &str, code: Option<&str>) -> Response<FullBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.map(String::from),
        },
    )
}

/// Map a library error onto its HTTP status and error code
pub fn error_from(err: SitetrackError) -> Response<FullBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    error_response(status, &err.to_string(), Some(err.code()))
}

/// File download with a `Content-Disposition` attachment header
pub fn download_response(
    content_type: &'static str,
    filename: &str,
    bytes: Vec<u8>,
) -> Response<FullBody> {
    let mut response = with_body(StatusCode::OK, content_type, Bytes::from(bytes));
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', "_"));
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            response.headers_mut().insert(CONTENT_DISPOSITION, value);
        }
        Err(e) => warn!("Skipping Content-Disposition for {}: {}", filename, e),
    }
    response
}

/// Resolve a fallible handler body into a response
pub fn respond<T: Serialize>(result: Result<T, SitetrackError>) -> Response<FullBody> {
    match result {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => error_from(e),
    }
}

pub fn get_auth_header(req: &Request<Incoming>) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
}

/// Verify the bearer token
pub fn authenticate(req: &Request<Incoming>, state: &AppState) -> Result<Claims, Response<FullBody>> {
    let token = extract_token_from_header(get_auth_header(req)).ok_or_else(|| {
        error_response(
            StatusCode::UNAUTHORIZED,
            "Missing authorization token",
            Some("UNAUTHORIZED"),
        )
    })?;

    let result = state.jwt.verify_token(token);
    match result.claims {
        Some(claims) if result.valid => Ok(claims),
        _ => Err(error_response(
            StatusCode::UNAUTHORIZED,
            &result.error.unwrap_or_else(|| "Invalid token".to_string()),
            Some("UNAUTHORIZED"),
        )),
    }
}

/// Verify the token and that its role may perform `operation`
pub fn require(
    req: &Request<Incoming>,
    state: &AppState,
    operation: &str,
) -> Result<Claims, Response<FullBody>> {
    let claims = authenticate(req, state)?;
    if !is_operation_allowed(operation, claims.role) {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "Insufficient permissions",
            Some("FORBIDDEN"),
        ));
    }
    Ok(claims)
}

/// Collect and parse a JSON request body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, Response<FullBody>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "Invalid body",
                Some("BAD_REQUEST"),
            ))
        }
    };

    serde_json::from_slice(&body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid JSON: {}", e),
            Some("BAD_REQUEST"),
        )
    })
}

/// Parse the query string; missing or malformed parameters fall back to defaults
pub fn query_params<T: DeserializeOwned + Default>(req: &Request<Incoming>) -> T {
    req.uri()
        .query()
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default()
}

/// Split `/{id}` or `/{id}/{action}` off a collection path
pub(crate) fn split_id(subpath: &str) -> Option<(&str, Option<&str>)> {
    let rest = subpath.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('/') {
        Some((id, action)) if !id.is_empty() => Some((id, Some(action))),
        Some(_) => None,
        None => Some((rest, None)),
    }
}

/// Load a record that the request refers to by id
pub(crate) async fn load_existing<T: Record>(state: &AppState, id: &str) -> Result<T, SitetrackError> {
    load::<T>(state.store.as_ref(), id)
        .await?
        .ok_or_else(|| SitetrackError::NotFound(format!("{} {}", T::COLLECTION, id)))
}

/// Run blocking work (image codecs) off the async workers
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, SitetrackError>
where
    F: FnOnce() -> Result<T, SitetrackError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SitetrackError::Internal(format!("Worker task failed: {}", e)))?
}

pub fn method_not_allowed() -> Response<FullBody> {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed",
        Some("METHOD_NOT_ALLOWED"),
    )
}

pub fn not_found(what: &str) -> Response<FullBody> {
    error_response(StatusCode::NOT_FOUND, &format!("{} not found", what), Some("NOT_FOUND"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_id() {
        assert_eq!(split_id("/abc"), Some(("abc", None)));
        assert_eq!(split_id("/abc/export.pdf"), Some(("abc", Some("export.pdf"))));
        assert_eq!(split_id("/"), None);
        assert_eq!(split_id(""), None);
        assert_eq!(split_id("//x"), None);
    }

    #[test]
    fn test_error_from_maps_status() {
        let response = error_from(SitetrackError::Forbidden("no".into()));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = error_from(SitetrackError::NotFound("gone".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_download_headers() {
        let response = download_response("application/pdf", "Report \"A\".pdf", vec![1]);
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"Report _A_.pdf\""
        );
        assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
    }
}
