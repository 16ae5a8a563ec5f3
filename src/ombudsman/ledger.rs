use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::db::{self, EntityState, ManifestationDb};
use super::lifecycle::{LifecycleEngine, TransitionRequest, next_updated_at};
use super::models::{Manifestation, StaffResponse};
use crate::errors::{OmbudsmanError, Result};

/// Append-only log of staff replies.
///
/// Appending never changes status on its own; callers that want the
/// RESPONDIDA move in the same commit use [`ResponseLedger::append_and_transition`].
pub struct ResponseLedger;

impl ResponseLedger {
    pub fn append(
        db: &ManifestationDb,
        id: &str,
        texto: &str,
        gestor_nome: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Manifestation> {
        let texto = normalize_texto(texto)?;
        let gestor_nome = normalize_gestor(gestor_nome);
        db.write(|conn| {
            Self::apply(conn, id, &texto, gestor_nome.as_deref(), now)?;
            db::load_by_id(conn, id)
        })
    }

    /// Append a response and apply a transition as one unit: both land or
    /// neither does.
    pub fn append_and_transition(
        db: &ManifestationDb,
        id: &str,
        texto: &str,
        gestor_nome: Option<&str>,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<Manifestation> {
        let texto = normalize_texto(texto)?;
        let gestor_nome = normalize_gestor(gestor_nome);
        db.write(|conn| {
            // One commit, one `updatedAt`, shared by the response and the status write.
            let state = db::read_state(conn, id)?;
            let updated_at = next_updated_at(state.updated_at, now);
            Self::apply_to(conn, &state, &texto, gestor_nome.as_deref(), now, updated_at)?;
            let state = db::read_state(conn, id)?;
            LifecycleEngine::apply_to(conn, &state, request, updated_at)?;
            db::load_by_id(conn, id)
        })
    }

    pub(crate) fn apply(
        conn: &Connection,
        id: &str,
        texto: &str,
        gestor_nome: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StaffResponse> {
        let state = db::read_state(conn, id)?;
        let updated_at = next_updated_at(state.updated_at, now);
        Self::apply_to(conn, &state, texto, gestor_nome, now, updated_at)
    }

    fn apply_to(
        conn: &Connection,
        state: &EntityState,
        texto: &str,
        gestor_nome: Option<&str>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<StaffResponse> {
        let response = StaffResponse {
            id: Uuid::new_v4().to_string(),
            texto: texto.to_string(),
            gestor_nome: gestor_nome.map(str::to_string),
            created_at,
        };
        db::insert_response(conn, state, &response, updated_at)?;

        tracing::info!(
            manifestation_id = %state.id,
            response_id = %response.id,
            status = %state.status,
            "Staff response appended"
        );
        Ok(response)
    }
}

fn normalize_texto(texto: &str) -> Result<String> {
    let trimmed = texto.trim();
    if trimmed.is_empty() {
        return Err(OmbudsmanError::validation("texto must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn normalize_gestor(gestor_nome: Option<&str>) -> Option<String> {
    gestor_nome
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
}
