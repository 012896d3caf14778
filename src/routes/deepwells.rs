//! Deepwell endpoints
//!
//! - `GET    /api/deepwells?q=&provider=&status=` - filtered list
//! - `GET    /api/deepwells/production` - monthly totals for the chart
//! - `GET    /api/deepwells/{id}`
//! - `POST   /api/deepwells`, `PUT /api/deepwells/{id}` - full overwrite
//! - `DELETE /api/deepwells/{id}` - elevated users (admin or level 2)

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::{
    error_from, json_response, load_existing, method_not_allowed, not_found, query_params,
    read_json, require, respond, split_id, FullBody,
};
use crate::auth::Claims;
use crate::db::schemas::history::{record_edit, sorted_desc};
use crate::db::schemas::Deepwell;
use crate::logging::AuditAction;
use crate::server::AppState;
use crate::store::{load, new_id, save, Collection};
use crate::tracking::{apply_stats, clean_months, monthly_by_provider, DeepwellFilter};
use crate::types::SitetrackError;

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
    id: String,
}

/// Normalize a submitted deepwell into the record to store
pub fn prepare_deepwell(
    mut well: Deepwell,
    existing: Option<&Deepwell>,
    id: String,
    editor: &Claims,
) -> Result<Deepwell, SitetrackError> {
    well.name = well.name.trim().to_string();
    if well.name.is_empty() {
        return Err(SitetrackError::Validation("Deepwell name is required".into()));
    }
    well.id = id;
    well.provider = well.provider.trim().to_string();
    well.months = clean_months(std::mem::take(&mut well.months));
    apply_stats(&mut well);
    well.history = record_edit(existing.map(|w| w.history.as_slice()), &editor.email);
    Ok(well)
}

fn list_deepwells(state: &AppState, filter: &DeepwellFilter) -> Vec<Deepwell> {
    let wells = state.views.deepwells.snapshot();
    let mut list: Vec<Deepwell> = filter.apply(&wells).into_iter().cloned().collect();
    list.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    list
}

async fn get_deepwell(state: &AppState, id: &str) -> Result<Deepwell, SitetrackError> {
    let mut well = match state.views.deepwells.get(id) {
        Some(w) => w,
        None => load_existing::<Deepwell>(state, id).await?,
    };
    well.history = sorted_desc(&well.history);
    Ok(well)
}

async fn save_deepwell(
    state: &AppState,
    claims: &Claims,
    id: String,
    body: Deepwell,
    must_exist: bool,
) -> Result<(Deepwell, bool), SitetrackError> {
    let existing = load::<Deepwell>(state.store.as_ref(), &id).await?;
    if must_exist && existing.is_none() {
        return Err(SitetrackError::NotFound(format!("deepwells {}", id)));
    }
    let well = prepare_deepwell(body, existing.as_ref(), id, claims)?;

    let seq = save(state.store.as_ref(), &well).await?;
    state.views.deepwells.apply_local(well.clone(), seq);

    let created = existing.is_none();
    let action = if created { AuditAction::Create } else { AuditAction::Update };
    state
        .audit
        .log_write(claims, action, Collection::Deepwells, &well.id)
        .await;
    info!("Deepwell {} saved by {}", well.id, claims.email);
    Ok((well, created))
}

async fn handle_save(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path_id: Option<&str>,
) -> Response<FullBody> {
    let claims = match require(&req, &state, "write_deepwells") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let body: Deepwell = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let (id, must_exist) = match path_id {
        Some(id) => (id.to_string(), true),
        None if body.id.trim().is_empty() => (new_id(), false),
        None => (body.id.trim().to_string(), false),
    };

    match save_deepwell(&state, &claims, id, body, must_exist).await {
        Ok((well, true)) => json_response(StatusCode::CREATED, &well),
        Ok((well, false)) => json_response(StatusCode::OK, &well),
        Err(e) => error_from(e),
    }
}

async fn handle_delete(req: Request<Incoming>, state: Arc<AppState>, id: &str) -> Response<FullBody> {
    let claims = match require(&req, &state, "delete_deepwells") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.store.delete(Collection::Deepwells, id).await {
        Ok(Some(seq)) => {
            state.views.deepwells.remove_local(id, seq);
            state
                .audit
                .log_write(&claims, AuditAction::Delete, Collection::Deepwells, id)
                .await;
            info!("Deepwell {} deleted by {}", id, claims.email);
            json_response(
                StatusCode::OK,
                &DeletedResponse {
                    deleted: true,
                    id: id.to_string(),
                },
            )
        }
        Ok(None) => not_found("Deepwell"),
        Err(e) => error_from(e),
    }
}

/// Dispatch `/api/deepwells*`
pub async fn handle_deepwells_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let subpath = path.strip_prefix("/api/deepwells").unwrap_or("");
    let method = req.method().clone();

    match (&method, subpath) {
        (&Method::GET, "" | "/") => {
            if let Err(resp) = require(&req, &state, "read_deepwells") {
                return resp;
            }
            let filter: DeepwellFilter = query_params(&req);
            json_response(StatusCode::OK, &list_deepwells(&state, &filter))
        }
        (&Method::POST, "" | "/") => handle_save(req, state, None).await,
        (&Method::GET, "/production") => {
            if let Err(resp) = require(&req, &state, "read_deepwells") {
                return resp;
            }
            let filter: DeepwellFilter = query_params(&req);
            let wells = list_deepwells(&state, &filter);
            json_response(StatusCode::OK, &monthly_by_provider(&wells))
        }
        (_, "" | "/" | "/production") => method_not_allowed(),
        (_, p) => match split_id(p) {
            Some((id, None)) => match &method {
                &Method::GET => {
                    if let Err(resp) = require(&req, &state, "read_deepwells") {
                        return resp;
                    }
                    respond(get_deepwell(&state, id).await)
                }
                &Method::PUT => handle_save(req, state, Some(id)).await,
                &Method::DELETE => handle_delete(req, state, id).await,
                _ => method_not_allowed(),
            },
            _ => not_found("Deepwell endpoint"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::schemas::MonthlyProduction;

    fn editor() -> Claims {
        Claims {
            sub: "u1".into(),
            email: "eng@site.ph".into(),
            role: Role::Member,
            version: 1,
            iat: 0,
            exp: u64::MAX,
        }
    }

    #[test]
    fn test_prepare_recomputes_stats() {
        let well = Deepwell {
            name: " DW-01 ".into(),
            provider: "MWCI ".into(),
            months: vec![
                MonthlyProduction { month: "2024-01".into(), prod: 100.0 },
                MonthlyProduction { month: "".into(), prod: 40.0 },
                MonthlyProduction { month: "2024-02".into(), prod: 0.0 },
                MonthlyProduction { month: "2024-03".into(), prod: 50.0 },
            ],
            avg_prod: 9999.0,
            ..Default::default()
        };
        let saved = prepare_deepwell(well, None, "d1".into(), &editor()).unwrap();
        assert_eq!(saved.name, "DW-01");
        assert_eq!(saved.provider, "MWCI");
        assert_eq!(saved.months.len(), 2);
        assert_eq!(saved.total_prod, 150.0);
        assert_eq!(saved.avg_prod, 75.0);
        assert_eq!(saved.history.len(), 1);
    }

    #[test]
    fn test_prepare_requires_name() {
        let err = prepare_deepwell(Deepwell::default(), None, "d1".into(), &editor()).unwrap_err();
        assert!(matches!(err, SitetrackError::Validation(_)));
    }
}
