//! Manifestation status state machine.
//!
//! `Status` is the single authoritative status vocabulary: codes, display
//! labels and the transition table all live here. Presentation code reads
//! [`Status::catalog`] instead of keeping its own label maps.
//!
//! ```text
//! RECEBIDA ──> EM_ANALISE ──> RESPONDIDA
//!     │            │              │
//!     └────────────┴──────────────┴──> ARQUIVADA (terminal)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::db::{self, EntityState, ManifestationDb};
use super::models::Manifestation;
use crate::errors::{OmbudsmanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Recebida,
    EmAnalise,
    Respondida,
    Arquivada,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Recebida,
        Status::EmAnalise,
        Status::Respondida,
        Status::Arquivada,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recebida => "RECEBIDA",
            Self::EmAnalise => "EM_ANALISE",
            Self::Respondida => "RESPONDIDA",
            Self::Arquivada => "ARQUIVADA",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Recebida => "Recebida",
            Self::EmAnalise => "Em Análise",
            Self::Respondida => "Respondida",
            Self::Arquivada => "Arquivada",
        }
    }

    /// Targets reachable in one step from this status.
    pub fn valid_transitions(self) -> &'static [Status] {
        match self {
            Self::Recebida => &[Self::EmAnalise, Self::Arquivada],
            Self::EmAnalise => &[Self::Respondida, Self::Arquivada],
            Self::Respondida => &[Self::Arquivada],
            Self::Arquivada => &[],
        }
    }

    pub fn can_transition_to(self, target: Status) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Same-state requests are rejected like any other missing edge.
    pub fn check_transition(self, target: Status) -> Result<()> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(OmbudsmanError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    pub fn catalog() -> Vec<StatusDescriptor> {
        Self::ALL.iter().map(|s| s.descriptor()).collect()
    }

    pub fn descriptor(self) -> StatusDescriptor {
        StatusDescriptor {
            value: self,
            label: self.label(),
            terminal: self.is_terminal(),
            next: self.valid_transitions().to_vec(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = OmbudsmanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RECEBIDA" => Ok(Self::Recebida),
            "EM_ANALISE" => Ok(Self::EmAnalise),
            "RESPONDIDA" => Ok(Self::Respondida),
            "ARQUIVADA" => Ok(Self::Arquivada),
            _ => Err(OmbudsmanError::validation(format!("Invalid status: {}", s))),
        }
    }
}

/// Catalog entry served to presentation code.
#[derive(Debug, Clone, Serialize)]
pub struct StatusDescriptor {
    pub value: Status,
    pub label: &'static str,
    pub terminal: bool,
    pub next: Vec<Status>,
}

/// A request to move a manifestation to `target`.
///
/// When `expected` is set the transition only applies if the stored status
/// still equals it, so two staff members acting on the same screen state
/// cannot both win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRequest {
    pub target: Status,
    pub expected: Option<Status>,
}

impl TransitionRequest {
    pub fn to(target: Status) -> Self {
        Self {
            target,
            expected: None,
        }
    }

    pub fn from_expected(expected: Status, target: Status) -> Self {
        Self {
            target,
            expected: Some(expected),
        }
    }
}

pub struct LifecycleEngine;

impl LifecycleEngine {
    /// Validate and apply a transition in its own write transaction.
    pub fn transition(
        db: &ManifestationDb,
        id: &str,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<Manifestation> {
        db.write(|conn| {
            Self::apply(conn, id, request, now)?;
            db::load_by_id(conn, id)
        })
    }

    /// Apply a transition inside a caller-owned transaction.
    ///
    /// The status read and the conditional write share the transaction, and the
    /// write is additionally guarded by the row version.
    pub(crate) fn apply(
        conn: &Connection,
        id: &str,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<Status> {
        let state = db::read_state(conn, id)?;
        let updated_at = next_updated_at(state.updated_at, now);
        Self::apply_to(conn, &state, request, updated_at)
    }

    /// Apply a transition to already-read state, stamping exactly `updated_at`.
    pub(crate) fn apply_to(
        conn: &Connection,
        state: &EntityState,
        request: TransitionRequest,
        updated_at: DateTime<Utc>,
    ) -> Result<Status> {
        if let Some(expected) = request.expected {
            if expected != state.status {
                return Err(OmbudsmanError::StaleStatus {
                    expected,
                    actual: state.status,
                });
            }
        }
        state.status.check_transition(request.target)?;
        db::write_status(conn, state, request.target, updated_at)?;

        tracing::info!(
            manifestation_id = %state.id,
            from = %state.status,
            to = %request.target,
            "Manifestation status changed"
        );
        Ok(state.status)
    }
}

/// `updatedAt` never moves backwards and strictly advances on every write,
/// even when the clock has not ticked since the previous one.
pub(crate) fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}
