//! Reforestation endpoints (members only)
//!
//! - `GET    /api/reforestations?q=&type=&status=`
//! - `GET    /api/reforestations/{id}`
//! - `POST   /api/reforestations`, `PUT /api/reforestations/{id}`
//! - `DELETE /api/reforestations/{id}` - admin only
//!
//! A save may carry new photo uploads and a KMZ attachment; without them
//! the stored photos and KMZ are kept.

use chrono::Utc;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{
    blocking, error_from, json_response, load_existing, method_not_allowed, not_found,
    query_params, read_json, require, respond, split_id, FullBody,
};
use crate::auth::Claims;
use crate::db::schemas::history::{record_edit, sorted_desc};
use crate::db::schemas::Reforestation;
use crate::logging::AuditAction;
use crate::photos::{merge_photos, validate_kmz};
use crate::server::AppState;
use crate::store::{load, new_id, save, Collection};
use crate::tracking::ReforestationFilter;
use crate::types::SitetrackError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KmzUpload {
    pub name: String,
    pub data_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReforestationInput {
    #[serde(flatten)]
    pub activity: Reforestation,
    pub uploads: Vec<String>,
    pub kmz: Option<KmzUpload>,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
    id: String,
}

/// Record to store from a save request; photos are merged separately
pub fn prepare_reforestation(
    input: ReforestationInput,
    existing: Option<&Reforestation>,
    id: String,
    editor: &Claims,
) -> Result<Reforestation, SitetrackError> {
    let mut activity = input.activity;
    activity.activity_name = activity.activity_name.trim().to_string();
    if activity.activity_name.is_empty() {
        return Err(SitetrackError::Validation("Activity name is required".into()));
    }
    activity.id = id;

    match input.kmz {
        Some(upload) => {
            let kmz = validate_kmz(&upload.name, &upload.data_url)?;
            activity.kmz_name = kmz.name;
            activity.kmz_data_url = kmz.data_url;
        }
        None => {
            activity.kmz_name = existing.map(|r| r.kmz_name.clone()).unwrap_or_default();
            activity.kmz_data_url = existing.map(|r| r.kmz_data_url.clone()).unwrap_or_default();
        }
    }

    activity.photos = existing.map(|r| r.photos.clone()).unwrap_or_default();
    activity.timestamp = Utc::now().timestamp_millis();
    activity.history = record_edit(existing.map(|r| r.history.as_slice()), &editor.email);
    Ok(activity)
}

fn list_reforestations(state: &AppState, filter: &ReforestationFilter) -> Vec<Reforestation> {
    let activities = state.views.reforestations.snapshot();
    let mut list: Vec<Reforestation> = filter.apply(&activities).into_iter().cloned().collect();
    // Newest first
    list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    list
}

async fn get_reforestation(state: &AppState, id: &str) -> Result<Reforestation, SitetrackError> {
    let mut activity = match state.views.reforestations.get(id) {
        Some(r) => r,
        None => load_existing::<Reforestation>(state, id).await?,
    };
    activity.history = sorted_desc(&activity.history);
    Ok(activity)
}

async fn save_reforestation(
    state: &AppState,
    claims: &Claims,
    id: String,
    input: ReforestationInput,
    must_exist: bool,
) -> Result<(Reforestation, bool), SitetrackError> {
    let existing = load::<Reforestation>(state.store.as_ref(), &id).await?;
    if must_exist && existing.is_none() {
        return Err(SitetrackError::NotFound(format!("reforestations {}", id)));
    }

    let uploads = input.uploads.clone();
    let mut activity = prepare_reforestation(input, existing.as_ref(), id, claims)?;
    let current = std::mem::take(&mut activity.photos);
    activity.photos = blocking(move || merge_photos(&uploads, current)).await?;

    let seq = save(state.store.as_ref(), &activity).await?;
    state.views.reforestations.apply_local(activity.clone(), seq);

    let created = existing.is_none();
    let action = if created { AuditAction::Create } else { AuditAction::Update };
    state
        .audit
        .log_write(claims, action, Collection::Reforestations, &activity.id)
        .await;
    info!("Reforestation {} saved by {}", activity.id, claims.email);
    Ok((activity, created))
}

async fn handle_save(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path_id: Option<&str>,
) -> Response<FullBody> {
    let claims = match require(&req, &state, "write_reforestations") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let input: ReforestationInput = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let (id, must_exist) = match path_id {
        Some(id) => (id.to_string(), true),
        None if input.activity.id.trim().is_empty() => (new_id(), false),
        None => (input.activity.id.trim().to_string(), false),
    };

    match save_reforestation(&state, &claims, id, input, must_exist).await {
        Ok((activity, true)) => json_response(StatusCode::CREATED, &activity),
        Ok((activity, false)) => json_response(StatusCode::OK, &activity),
        Err(e) => error_from(e),
    }
}

async fn handle_delete(req: Request<Incoming>, state: Arc<AppState>, id: &str) -> Response<FullBody> {
    let claims = match require(&req, &state, "delete_reforestations") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.store.delete(Collection::Reforestations, id).await {
        Ok(Some(seq)) => {
            state.views.reforestations.remove_local(id, seq);
            state
                .audit
                .log_write(&claims, AuditAction::Delete, Collection::Reforestations, id)
                .await;
            json_response(
                StatusCode::OK,
                &DeletedResponse {
                    deleted: true,
                    id: id.to_string(),
                },
            )
        }
        Ok(None) => not_found("Reforestation"),
        Err(e) => error_from(e),
    }
}

/// Dispatch `/api/reforestations*`
pub async fn handle_reforestations_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let subpath = path.strip_prefix("/api/reforestations").unwrap_or("");
    let method = req.method().clone();

    match (&method, subpath) {
        (&Method::GET, "" | "/") => {
            if let Err(resp) = require(&req, &state, "read_reforestations") {
                return resp;
            }
            let filter: ReforestationFilter = query_params(&req);
            json_response(StatusCode::OK, &list_reforestations(&state, &filter))
        }
        (&Method::POST, "" | "/") => handle_save(req, state, None).await,
        (_, "" | "/") => method_not_allowed(),
        (_, p) => match split_id(p) {
            Some((id, None)) => match &method {
                &Method::GET => {
                    if let Err(resp) = require(&req, &state, "read_reforestations") {
                        return resp;
                    }
                    respond(get_reforestation(&state, id).await)
                }
                &Method::PUT => handle_save(req, state, Some(id)).await,
                &Method::DELETE => handle_delete(req, state, id).await,
                _ => method_not_allowed(),
            },
            _ => not_found("Reforestation endpoint"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn editor() -> Claims {
        Claims {
            sub: "u1".into(),
            email: "forester@site.ph".into(),
            role: Role::Member,
            version: 1,
            iat: 0,
            exp: u64::MAX,
        }
    }

    fn input(json: serde_json::Value) -> ReforestationInput {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_kmz_must_be_kmz() {
        let body = input(serde_json::json!({
            "activityName": "Mangrove planting",
            "kmz": {"name": "area.kml", "dataUrl": "data:application/octet-stream;base64,AA=="}
        }));
        let err = prepare_reforestation(body, None, "r1".into(), &editor()).unwrap_err();
        assert!(matches!(err, SitetrackError::Validation(_)));
    }

    #[test]
    fn test_update_keeps_attachments() {
        let existing = Reforestation {
            id: "r1".into(),
            activity_name: "Mangrove planting".into(),
            photos: vec!["data:image/jpeg;base64,AA==".into()],
            kmz_name: "area.kmz".into(),
            kmz_data_url: "data:application/vnd.google-earth.kmz;base64,AA==".into(),
            history: record_edit(None, "first@site.ph"),
            ..Default::default()
        };
        let body = input(serde_json::json!({
            "activityName": "Mangrove planting",
            "treesPlanted": "1200"
        }));
        let saved = prepare_reforestation(body, Some(&existing), "r1".into(), &editor()).unwrap();
        assert_eq!(saved.kmz_name, "area.kmz");
        assert_eq!(saved.photos.len(), 1);
        assert_eq!(saved.trees_planted, 1200.0);
        assert_eq!(saved.history.len(), 2);
        assert!(saved.timestamp > 0);
    }

    #[test]
    fn test_new_kmz_replaces_old() {
        let body = input(serde_json::json!({
            "activityName": "Bamboo",
            "kmz": {"name": "Site.KMZ", "dataUrl": "data:application/octet-stream;base64,AA=="}
        }));
        let saved = prepare_reforestation(body, None, "r2".into(), &editor()).unwrap();
        assert_eq!(saved.kmz_name, "Site.KMZ");
        assert!(saved.kmz_data_url.starts_with("data:"));
    }
}
