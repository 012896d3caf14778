//! Runtime export settings (`GET/PUT /api/config`, admin only)
//!
//! Values stored in `config/app` override the startup flags for the
//! template location and the PDF converter. Blank values clear an override.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::projects::export_settings;
use super::{error_from, json_response, method_not_allowed, read_json, require, FullBody};
use crate::db::schemas::{AppConfigDoc, APP_CONFIG_ID};
use crate::export::{EndpointKind, ExportSettings};
use crate::logging::{AuditAction, AuditEvent};
use crate::server::AppState;
use crate::store::{load, save, Collection};
use crate::types::SitetrackError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EffectiveSettings {
    template_candidates: Vec<String>,
    pdf_endpoint: Option<String>,
    pdf_endpoint_kind: Option<String>,
}

impl From<&ExportSettings> for EffectiveSettings {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            template_candidates: settings.template_candidates(),
            pdf_endpoint: settings.pdf_endpoint.clone(),
            pdf_endpoint_kind: settings.pdf_endpoint.as_deref().map(|url| {
                EndpointKind::detect(settings.pdf_endpoint_type.as_deref(), url).to_string()
            }),
        }
    }
}

#[derive(Serialize)]
struct ConfigResponse {
    stored: AppConfigDoc,
    effective: EffectiveSettings,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Trim the submitted overrides and check the endpoint type
pub fn normalize_config(doc: AppConfigDoc) -> Result<AppConfigDoc, SitetrackError> {
    let doc = AppConfigDoc {
        pdf_endpoint: clean(doc.pdf_endpoint),
        pdf_endpoint_type: clean(doc.pdf_endpoint_type).map(|t| t.to_lowercase()),
        template_url: clean(doc.template_url),
    };
    if let Some(kind) = doc.pdf_endpoint_type.as_deref() {
        if !matches!(kind, "gotenberg" | "raw") {
            return Err(SitetrackError::Validation(format!(
                "pdfEndpointType must be gotenberg or raw, got {}",
                kind
            )));
        }
    }
    Ok(doc)
}

async fn current(state: &AppState) -> Result<ConfigResponse, SitetrackError> {
    let stored = load::<AppConfigDoc>(state.store.as_ref(), APP_CONFIG_ID)
        .await?
        .unwrap_or_default();
    let effective = export_settings(state).await;
    Ok(ConfigResponse {
        stored,
        effective: EffectiveSettings::from(&effective),
    })
}

async fn handle_put(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let claims = match require(&req, &state, "manage_config") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let body: AppConfigDoc = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let doc = match normalize_config(body) {
        Ok(d) => d,
        Err(e) => return error_from(e),
    };
    if let Err(e) = save(state.store.as_ref(), &doc).await {
        return error_from(e);
    }

    state
        .audit
        .log(
            AuditEvent::new(AuditAction::ConfigUpdate)
                .by(&claims)
                .with_document(Collection::Config, APP_CONFIG_ID),
        )
        .await;
    info!("Export settings updated by {}", claims.email);

    match current(&state).await {
        Ok(config) => json_response(StatusCode::OK, &config),
        Err(e) => error_from(e),
    }
}

pub async fn handle_config_request(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    match *req.method() {
        Method::GET => {
            if let Err(resp) = require(&req, &state, "manage_config") {
                return resp;
            }
            match current(&state).await {
                Ok(config) => json_response(StatusCode::OK, &config),
                Err(e) => error_from(e),
            }
        }
        Method::PUT => handle_put(req, state).await,
        _ => method_not_allowed(),
    }
}
