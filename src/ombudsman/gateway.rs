use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::clock::Clock;
use super::db::{DbHandle, ManifestationDb, PageLimits};
use super::ledger::ResponseLedger;
use super::lifecycle::{LifecycleEngine, Status, StatusDescriptor, TransitionRequest};
use super::models::*;
use super::protocol::{self, ProtocolGenerator};
use crate::errors::{OmbudsmanError, Result};

/// Message returned for every failed public lookup, so callers cannot tell a
/// malformed protocol from one that was never issued.
pub const PUBLIC_NOT_FOUND: &str = "Nenhuma manifestação encontrada para este protocolo";

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// Total attempts for a write that keeps losing to concurrent writers.
    pub conflict_attempts: u32,
    pub page_limits: PageLimits,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            conflict_attempts: 3,
            page_limits: PageLimits::default(),
        }
    }
}

/// Entry point for the citizen and staff surfaces.
///
/// Every operation runs its storage work on the blocking pool via
/// [`DbHandle::call`] and takes "now" from the injected clock.
#[derive(Clone)]
pub struct QueryGateway {
    db: DbHandle,
    clock: Arc<dyn Clock>,
    protocol: ProtocolGenerator,
    settings: GatewaySettings,
}

impl QueryGateway {
    pub fn new(
        db: DbHandle,
        clock: Arc<dyn Clock>,
        protocol: ProtocolGenerator,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            db,
            clock,
            protocol,
            settings,
        }
    }

    pub async fn submit(&self, draft: ManifestationDraft) -> Result<SubmissionReceipt> {
        let protocol = self.protocol;
        let created = self
            .with_retry("submit", move |db, now| {
                db.create(draft.clone(), &protocol, now)
            })
            .await?;
        tracing::info!(
            manifestation_id = %created.id,
            protocolo = %created.protocolo,
            tipo = %created.tipo.as_str(),
            anonimo = created.anonimo,
            "Manifestation submitted"
        );
        Ok(SubmissionReceipt {
            id: created.id,
            protocolo: created.protocolo,
        })
    }

    /// Citizen lookup. Surrounding whitespace is ignored; anything else that
    /// does not resolve yields the same `NotFound`.
    pub async fn lookup_by_protocolo(&self, protocolo: &str) -> Result<ManifestationView> {
        let protocolo = protocolo.trim().to_string();
        if !protocol::is_well_formed(&protocolo) {
            tracing::debug!("Public lookup with malformed protocol");
            return Err(public_not_found());
        }
        let found = self
            .db
            .call(move |db| db.get_by_protocolo(&protocolo))
            .await
            .map_err(|e| match e {
                OmbudsmanError::NotFound(_) => {
                    tracing::debug!("Public lookup miss");
                    public_not_found()
                }
                other => other,
            })?;
        Ok(ManifestationView::render(found, Audience::Public))
    }

    pub async fn get_detail(&self, id: &str) -> Result<ManifestationView> {
        let id = id.to_string();
        let found = self.db.call(move |db| db.get_by_id(&id)).await?;
        Ok(ManifestationView::render(found, Audience::Staff))
    }

    pub async fn list(
        &self,
        filter: ManifestationFilter,
        page: PageRequest,
    ) -> Result<Page<ManifestationSummary>> {
        let limits = self.settings.page_limits;
        self.db
            .call(move |db| db.list(&filter, &page, limits))
            .await
    }

    pub async fn update_status(
        &self,
        id: &str,
        target: Status,
        expected: Option<Status>,
    ) -> Result<ManifestationView> {
        let id = id.to_string();
        let request = TransitionRequest { target, expected };
        let updated = self
            .with_retry("update_status", move |db, now| {
                LifecycleEngine::transition(db, &id, request, now)
            })
            .await?;
        Ok(ManifestationView::render(updated, Audience::Staff))
    }

    /// Append a staff response, optionally moving the status in the same commit.
    pub async fn add_response(
        &self,
        id: &str,
        texto: &str,
        gestor_nome: Option<String>,
        transition: Option<TransitionRequest>,
    ) -> Result<ManifestationView> {
        let id = id.to_string();
        let texto = texto.to_string();
        let updated = self
            .with_retry("add_response", move |db, now| match transition {
                Some(request) => ResponseLedger::append_and_transition(
                    db,
                    &id,
                    &texto,
                    gestor_nome.as_deref(),
                    request,
                    now,
                ),
                None => ResponseLedger::append(db, &id, &texto, gestor_nome.as_deref(), now),
            })
            .await?;
        Ok(ManifestationView::render(updated, Audience::Staff))
    }

    pub fn status_catalog(&self) -> Vec<StatusDescriptor> {
        Status::catalog()
    }

    pub fn kind_catalog(&self) -> Vec<KindDescriptor> {
        ManifestationKind::catalog()
    }

    /// Run a write, re-reading state and the clock on every attempt.
    ///
    /// Only `Conflict` is retried; validation, transition and stale-status
    /// errors are returned as-is.
    async fn with_retry<F, R>(&self, operation: &'static str, f: F) -> Result<R>
    where
        F: Fn(&ManifestationDb, DateTime<Utc>) -> Result<R> + Clone + Send + 'static,
        R: Send + 'static,
    {
        let attempts = self.settings.conflict_attempts.max(1);
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            let op = f.clone();
            match self.db.call(move |db| op(db, now)).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(operation, attempt, error = %e, "Write conflict, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(operation, attempts, error = %e, "Write conflict, giving up");
                    }
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

fn public_not_found() -> OmbudsmanError {
    OmbudsmanError::NotFound(PUBLIC_NOT_FOUND.to_string())
}
