use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::gateway::{PUBLIC_NOT_FOUND, QueryGateway};
use super::lifecycle::{Status, TransitionRequest};
use super::models::{ManifestationDraft, ManifestationFilter, ManifestationKind, PageRequest};
use crate::errors::{ErrorKind, OmbudsmanError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub gateway: QueryGateway,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: Status,
    pub expected_status: Option<Status>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddResponseRequest {
    pub texto: String,
    pub gestor_nome: Option<String>,
    /// When set, the response and this transition commit together.
    pub status: Option<Status>,
    pub expected_status: Option<Status>,
}

/// Raw list query. Enum filters are parsed by hand so that a bad code is a
/// validation error with a JSON body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub tipo: Option<String>,
    pub orgao: Option<String>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

impl ListQuery {
    fn into_parts(self) -> Result<(ManifestationFilter, PageRequest), OmbudsmanError> {
        let status = non_empty(self.status)
            .map(|s| Status::from_str(&s))
            .transpose()?;
        let tipo = non_empty(self.tipo)
            .map(|t| ManifestationKind::from_str(&t))
            .transpose()?;
        Ok((
            ManifestationFilter {
                status,
                tipo,
                orgao: non_empty(self.orgao),
            },
            PageRequest {
                limit: self.limit,
                cursor: non_empty(self.cursor),
            },
        ))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    Conflict(String),
    Internal(String),
}

impl From<OmbudsmanError> for ApiError {
    fn from(err: OmbudsmanError) -> Self {
        match err.kind() {
            ErrorKind::Validation => ApiError::BadRequest(err.to_string()),
            ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
            ErrorKind::InvalidTransition => ApiError::Unprocessable(err.to_string()),
            ErrorKind::Conflict => ApiError::Conflict(err.to_string()),
            ErrorKind::Internal => {
                tracing::error!(error = ?err, "Internal error while handling request");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid input: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("Invalid input: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("Invalid input: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorKind::Validation, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorKind::NotFound, msg),
            ApiError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::InvalidTransition,
                msg,
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, ErrorKind::Conflict, msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, msg)
            }
        };
        (
            status,
            Json(serde_json::json!({"error": message, "kind": kind.as_str()})),
        )
            .into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/manifestacoes", post(submit_manifestation))
        .route(
            "/api/manifestacoes/protocolo/{protocolo}",
            get(get_public_manifestation),
        )
        .route("/api/catalogo/status", get(status_catalog))
        .route("/api/catalogo/tipos", get(kind_catalog))
        .route("/api/admin/manifestacoes", get(list_manifestations))
        .route("/api/admin/manifestacoes/{id}", get(get_manifestation_detail))
        .route(
            "/api/admin/manifestacoes/{id}/status",
            patch(update_manifestation_status),
        )
        .route(
            "/api/admin/manifestacoes/{id}/respostas",
            post(add_manifestation_response),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_manifestation(
    State(state): State<SharedState>,
    payload: Result<Json<ManifestationDraft>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(draft) = payload?;
    let receipt = state.gateway.submit(draft).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn get_public_manifestation(
    State(state): State<SharedState>,
    protocolo: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // An undecodable segment is just another protocol that does not exist.
    let Path(protocolo) = protocolo.map_err(|rejection| {
        tracing::debug!(reason = %rejection.body_text(), "Public lookup with undecodable protocol");
        ApiError::NotFound(PUBLIC_NOT_FOUND.to_string())
    })?;
    let view = state.gateway.lookup_by_protocolo(&protocolo).await?;
    Ok(Json(view))
}

async fn status_catalog(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.gateway.status_catalog())
}

async fn kind_catalog(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.gateway.kind_catalog())
}

async fn list_manifestations(
    State(state): State<SharedState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let (filter, page) = query.into_parts()?;
    let page = state.gateway.list(filter, page).await?;
    Ok(Json(page))
}

async fn get_manifestation_detail(
    State(state): State<SharedState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let view = state.gateway.get_detail(&id).await?;
    Ok(Json(view))
}

async fn update_manifestation_status(
    State(state): State<SharedState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let view = state
        .gateway
        .update_status(&id, req.status, req.expected_status)
        .await?;
    Ok(Json(view))
}

async fn add_manifestation_response(
    State(state): State<SharedState>,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<AddResponseRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(req) = payload?;
    let transition = req.status.map(|target| TransitionRequest {
        target,
        expected: req.expected_status,
    });
    let view = state
        .gateway
        .add_response(&id, &req.texto, req.gestor_nome, transition)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

// ── Tests ─────────────────────────────────────────────────────────────
