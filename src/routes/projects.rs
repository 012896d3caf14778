//! Project endpoints
//!
//! - `GET    /api/projects?q=&agency=&status=` - filtered table rows
//! - `GET    /api/projects/agencies` - agency filter options
//! - `GET    /api/projects/{id}` - full record with derived fields
//! - `POST   /api/projects` - create (or overwrite when the body has an id)
//! - `PUT    /api/projects/{id}` - overwrite an existing project
//! - `POST   /api/projects/{id}/accomplishments` - add or replace one snapshot
//! - `DELETE /api/projects/{id}` - elevated users (admin or level 2)
//! - `GET    /api/projects/{id}/export.docx|export.pdf` - inspection report
//!
//! Saves are full overwrites. The stored history, photos and accomplishment
//! list are carried over from the existing record and extended, never taken
//! from the request body.

use chrono::NaiveDate;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    blocking, error_from, json_response, load_existing, method_not_allowed, not_found, query_params,
    read_json, require, respond, split_id, FullBody,
};
use crate::auth::Claims;
use crate::db::schemas::history::{record_edit, sorted_desc};
use crate::db::schemas::{Accomplishment, AppConfigDoc, Project, APP_CONFIG_ID};
use crate::export::{export_filename, ExportSettings, DOCX_CONTENT_TYPE, PDF_CONTENT_TYPE};
use crate::logging::{AuditAction, AuditEvent};
use crate::photos::merge_photos;
use crate::server::AppState;
use crate::store::{load, new_id, save, Collection};
use crate::tracking::accomplishment::previous_percent;
use crate::tracking::{
    agencies, derive_status, history_view, latest, today, upsert, AccomplishmentInput,
    ProjectFilter, ProjectStatus,
};
use crate::types::SitetrackError;

/// Header set when a PDF export was served as DOCX instead
pub const EXPORT_FALLBACK_HEADER: &str = "x-export-fallback";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of a project save
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectInput {
    #[serde(flatten)]
    pub project: Project,
    /// Newly picked photos as data URLs; replaces the stored photos when non-empty
    pub uploads: Vec<String>,
    /// Progress snapshot recorded with this save
    pub accomplishment: Option<AccomplishmentInput>,
}

/// Table row; photos and history are left out
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub implementing_agency: String,
    pub location: String,
    pub contractor: String,
    pub contract_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_contract_amount: Option<f64>,
    pub ntp_date: Option<NaiveDate>,
    pub target_completion: Option<NaiveDate>,
    pub percent: f64,
    pub status: ProjectStatus,
}

impl ProjectRow {
    fn new(project: &Project, today: NaiveDate) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            implementing_agency: project.implementing_agency.clone(),
            location: project.location.clone(),
            contractor: project.contractor.clone(),
            contract_amount: project.contract_amount,
            revised_contract_amount: project.revised_contract_amount,
            ntp_date: project.ntp_date,
            target_completion: project.revised_completion.or(project.original_completion),
            percent: latest(&project.accomplishments).map_or(0.0, |a| a.percent),
            status: derive_status(project, today),
        }
    }
}

/// Full record plus the values the detail view derives from it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub status: ProjectStatus,
    /// Snapshots newest first with duplicates removed
    pub accomplishment_history: Vec<Accomplishment>,
    /// Prefill for the next snapshot's previous percent
    pub previous_percent: f64,
}

impl ProjectDetail {
    pub fn new(mut project: Project, today: NaiveDate) -> Self {
        project.history = sorted_desc(&project.history);
        Self {
            status: derive_status(&project, today),
            accomplishment_history: history_view(&project.accomplishments),
            previous_percent: previous_percent(&project.accomplishments),
            project,
        }
    }
}

#[derive(Serialize)]
struct AgenciesResponse {
    agencies: Vec<String>,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
    id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Docx,
    Pdf,
}

// =============================================================================
// Save rules
// =============================================================================

/// Text fields of a snapshot left blank take the project's current values
fn snapshot_input(mut input: AccomplishmentInput, project: &Project) -> AccomplishmentInput {
    if input.activities.trim().is_empty() {
        input.activities = project.activities.clone();
    }
    if input.issue.trim().is_empty() {
        input.issue = project.issues.clone();
    }
    if input.remarks.trim().is_empty() {
        input.remarks = project.remarks.clone();
    }
    input
}

/// Build the record to store from a save request.
///
/// Photos are not touched here; see [`merge_photos`].
pub fn prepare_project(
    input: ProjectInput,
    existing: Option<&Project>,
    id: String,
    editor: &Claims,
    today: NaiveDate,
) -> Result<Project, SitetrackError> {
    let mut project = input.project;
    project.name = project.name.trim().to_string();
    project.contractor = project.contractor.trim().to_string();
    if project.name.is_empty() || project.contractor.is_empty() {
        return Err(SitetrackError::Validation(
            "Project name and contractor are required".into(),
        ));
    }
    project.id = id;

    project.contract_docs_link = if editor.role.is_elevated() {
        project.contract_docs_link.trim().to_string()
    } else {
        existing
            .map(|p| p.contract_docs_link.clone())
            .unwrap_or_default()
    };

    project.progress_billing.retain(|b| b.is_complete());
    project.history = record_edit(existing.map(|p| p.history.as_slice()), &editor.email);
    project.photos = existing.map(|p| p.photos.clone()).unwrap_or_default();
    project.s_curve_data_url = existing.and_then(|p| p.s_curve_data_url.clone());
    project.accomplishments = existing
        .map(|p| p.accomplishments.clone())
        .unwrap_or_default();

    if let Some(snapshot) = input.accomplishment {
        let entry = snapshot_input(snapshot, &project).into_entry(today);
        upsert(&mut project.accomplishments, entry);
    }
    Ok(project)
}

// =============================================================================
// Handlers
// =============================================================================

fn list_projects(state: &AppState, filter: &ProjectFilter) -> Vec<ProjectRow> {
    let today = today();
    let projects = state.views.projects.snapshot();
    let mut rows: Vec<ProjectRow> = filter
        .apply(&projects, today)
        .into_iter()
        .map(|p| ProjectRow::new(p, today))
        .collect();
    rows.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    rows
}

async fn get_project(state: &AppState, id: &str) -> Result<ProjectDetail, SitetrackError> {
    let project = match state.views.projects.get(id) {
        Some(p) => p,
        None => load_existing::<Project>(state, id).await?,
    };
    Ok(ProjectDetail::new(project, today()))
}

/// Shared save path for create and update
async fn save_project(
    state: &AppState,
    claims: &Claims,
    id: String,
    input: ProjectInput,
    must_exist: bool,
) -> Result<(ProjectDetail, bool), SitetrackError> {
    let existing = load::<Project>(state.store.as_ref(), &id).await?;
    if must_exist && existing.is_none() {
        return Err(SitetrackError::NotFound(format!("projects {}", id)));
    }

    let uploads = input.uploads.clone();
    let mut project = prepare_project(input, existing.as_ref(), id, claims, today())?;

    let current = existing.as_ref().map(Project::display_photos).unwrap_or_default();
    project.photos = blocking(move || merge_photos(&uploads, current)).await?;

    let seq = save(state.store.as_ref(), &project).await?;
    state.views.projects.apply_local(project.clone(), seq);

    let created = existing.is_none();
    let action = if created { AuditAction::Create } else { AuditAction::Update };
    state
        .audit
        .log_write(claims, action, Collection::Projects, &project.id)
        .await;
    info!(
        "Project {} {} by {}",
        project.id,
        if created { "created" } else { "updated" },
        claims.email
    );

    Ok((ProjectDetail::new(project, today()), created))
}

async fn handle_save(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path_id: Option<&str>,
) -> Response<FullBody> {
    let claims = match require(&req, &state, "write_projects") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let input: ProjectInput = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let (id, must_exist) = match path_id {
        Some(id) => (id.to_string(), true),
        None => {
            let given = input.project.id.trim();
            (if given.is_empty() { new_id() } else { given.to_string() }, false)
        }
    };

    match save_project(&state, &claims, id, input, must_exist).await {
        Ok((detail, true)) => json_response(StatusCode::CREATED, &detail),
        Ok((detail, false)) => json_response(StatusCode::OK, &detail),
        Err(e) => error_from(e),
    }
}

async fn add_accomplishment(
    state: &AppState,
    claims: &Claims,
    id: &str,
    input: AccomplishmentInput,
) -> Result<ProjectDetail, SitetrackError> {
    let mut project = load_existing::<Project>(state, id).await?;
    let entry = snapshot_input(input, &project).into_entry(today());
    upsert(&mut project.accomplishments, entry);
    project.history = record_edit(Some(&project.history), &claims.email);

    let seq = save(state.store.as_ref(), &project).await?;
    state.views.projects.apply_local(project.clone(), seq);
    state
        .audit
        .log_write(claims, AuditAction::Update, Collection::Projects, id)
        .await;
    Ok(ProjectDetail::new(project, today()))
}

async fn handle_accomplishment(
    req: Request<Incoming>,
    state: Arc<AppState>,
    id: &str,
) -> Response<FullBody> {
    let claims = match require(&req, &state, "write_projects") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let input: AccomplishmentInput = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    respond(add_accomplishment(&state, &claims, id, input).await)
}

async fn handle_delete(req: Request<Incoming>, state: Arc<AppState>, id: &str) -> Response<FullBody> {
    let claims = match require(&req, &state, "delete_projects") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match state.store.delete(Collection::Projects, id).await {
        Ok(Some(seq)) => {
            state.views.projects.remove_local(id, seq);
            state
                .audit
                .log_write(&claims, AuditAction::Delete, Collection::Projects, id)
                .await;
            info!("Project {} deleted by {}", id, claims.email);
            json_response(
                StatusCode::OK,
                &DeletedResponse {
                    deleted: true,
                    id: id.to_string(),
                },
            )
        }
        Ok(None) => not_found("Project"),
        Err(e) => error_from(e),
    }
}

/// Export settings with the admin overrides from `config/app` applied
pub(crate) async fn export_settings(state: &AppState) -> ExportSettings {
    let settings = ExportSettings::from_args(&state.args);
    match load::<AppConfigDoc>(state.store.as_ref(), APP_CONFIG_ID).await {
        Ok(Some(overrides)) => settings.with_overrides(&overrides),
        Ok(None) => settings,
        Err(e) => {
            warn!("Could not read app config, using startup settings: {}", e);
            settings
        }
    }
}

async fn export_project(
    state: &AppState,
    claims: &Claims,
    id: &str,
    format: ExportFormat,
) -> Result<Response<FullBody>, SitetrackError> {
    let project = load_existing::<Project>(state, id).await?;
    let settings = export_settings(state).await;
    let docx = state.exporter.docx(&settings, &project, today()).await?;

    let (body, content_type, extension, fallback) = match format {
        ExportFormat::Docx => (docx, DOCX_CONTENT_TYPE, "docx", false),
        ExportFormat::Pdf if settings.pdf_endpoint.is_none() => {
            warn!("No PDF endpoint configured, serving DOCX for {}", id);
            (docx, DOCX_CONTENT_TYPE, "docx", true)
        }
        ExportFormat::Pdf => match state.exporter.pdf(&settings, docx.clone()).await {
            Ok(pdf) => (pdf, PDF_CONTENT_TYPE, "pdf", false),
            Err(e) => {
                warn!("PDF conversion failed for {}, serving DOCX: {}", id, e);
                (docx, DOCX_CONTENT_TYPE, "docx", true)
            }
        },
    };

    state
        .audit
        .log(
            AuditEvent::new(AuditAction::Export)
                .by(claims)
                .with_document(Collection::Projects, id)
                .with_metadata(serde_json::json!({ "format": extension, "fallback": fallback })),
        )
        .await;

    let mut response = super::download_response(
        content_type,
        &export_filename(&project.name, extension),
        body,
    );
    if fallback {
        response
            .headers_mut()
            .insert(EXPORT_FALLBACK_HEADER, HeaderValue::from_static("docx"));
    }
    Ok(response)
}

async fn handle_export(
    req: Request<Incoming>,
    state: Arc<AppState>,
    id: &str,
    format: ExportFormat,
) -> Response<FullBody> {
    let claims = match require(&req, &state, "export_reports") {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match export_project(&state, &claims, id, format).await {
        Ok(response) => response,
        Err(e) => error_from(e),
    }
}

/// Dispatch `/api/projects*`
pub async fn handle_projects_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let subpath = path.strip_prefix("/api/projects").unwrap_or("");
    let method = req.method().clone();

    match (&method, subpath) {
        (&Method::GET, "" | "/") => {
            if let Err(resp) = require(&req, &state, "read_projects") {
                return resp;
            }
            let filter: ProjectFilter = query_params(&req);
            json_response(StatusCode::OK, &list_projects(&state, &filter))
        }
        (&Method::POST, "" | "/") => handle_save(req, state, None).await,
        (&Method::GET, "/agencies") => {
            if let Err(resp) = require(&req, &state, "read_projects") {
                return resp;
            }
            let projects = state.views.projects.snapshot();
            json_response(
                StatusCode::OK,
                &AgenciesResponse {
                    agencies: agencies(&projects),
                },
            )
        }
        (_, "" | "/" | "/agencies") => method_not_allowed(),
        (_, p) => match split_id(p) {
            Some((id, None)) => match &method {
                &Method::GET => {
                    if let Err(resp) = require(&req, &state, "read_projects") {
                        return resp;
                    }
                    respond(get_project(&state, id).await)
                }
                &Method::PUT => handle_save(req, state, Some(id)).await,
                &Method::DELETE => handle_delete(req, state, id).await,
                _ => method_not_allowed(),
            },
            Some((id, Some("accomplishments"))) if method == Method::POST => {
                handle_accomplishment(req, state, id).await
            }
            Some((id, Some("export.docx"))) if method == Method::GET => {
                handle_export(req, state, id, ExportFormat::Docx).await
            }
            Some((id, Some("export.pdf"))) if method == Method::GET => {
                handle_export(req, state, id, ExportFormat::Pdf).await
            }
            _ => not_found("Project endpoint"),
        },
    }
}
