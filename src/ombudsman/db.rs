use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use super::lifecycle::Status;
use super::models::*;
use super::protocol::ProtocolGenerator;
use crate::errors::{OmbudsmanError, Result};

/// How long a writer waits on another connection's lock before giving up
/// with `OmbudsmanError::Conflict`.
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a call waits for a free pooled connection.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_POOL_SIZE: u32 = 8;

const MANIFESTATION_COLUMNS: &str = "id, protocolo, tipo, status, orgao, assunto, relato, anonimo, \
     nome, email, telefone, data_fato, horario_fato, local, pessoas_envolvidas, audio_url, \
     created_at, updated_at";

/// Async-safe handle to the manifestation database.
///
/// Runs each call on tokio's blocking thread pool via `spawn_blocking`, keeping
/// synchronous SQLite I/O off the async worker threads. Calls check out their
/// own pooled connection, so no lock is held between them; writers are
/// serialized by SQLite's `BEGIN IMMEDIATE` alone.
#[derive(Clone)]
pub struct DbHandle {
    db: ManifestationDb,
}

impl DbHandle {
    pub fn new(db: ManifestationDb) -> Self {
        Self { db }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ManifestationDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| OmbudsmanError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

/// Pool of SQLite connections onto one manifestation database.
///
/// File databases run in WAL mode, so readers never wait on a writer. An
/// in-memory database lives in a single connection and is only meant for tests.
#[derive(Clone)]
pub struct ManifestationDb {
    pool: Pool<SqliteConnectionManager>,
}

impl ManifestationDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_pool_size(path, DEFAULT_POOL_SIZE)
    }

    pub fn with_pool_size(path: &Path, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(CHECKOUT_TIMEOUT)
            .build(manager)
            .map_err(|e| {
                OmbudsmanError::Database(anyhow::anyhow!("Failed to open connection pool: {}", e))
            })?;
        let db = Self { pool };
        {
            let conn = db.conn()?;
            let _mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            run_migrations(&conn)?;
        }
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        // Every in-memory connection is its own database; keep exactly one alive.
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(CHECKOUT_TIMEOUT)
            .build(manager)
            .map_err(|e| {
                OmbudsmanError::Database(anyhow::anyhow!("Failed to open connection pool: {}", e))
            })?;
        let db = Self { pool };
        run_migrations(&*db.conn()?)?;
        Ok(db)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            OmbudsmanError::Conflict(format!("No database connection available: {}", e))
        })
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction; commit on `Ok`, roll
    /// back on `Err`. Not re-entrant.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against a single read snapshot.
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Deferred)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Manifestation store ───────────────────────────────────────────

    /// Validate a draft and persist it with its attachments and a fresh
    /// protocol, all in one transaction.
    pub fn create(
        &self,
        draft: ManifestationDraft,
        generator: &ProtocolGenerator,
        now: DateTime<Utc>,
    ) -> Result<Manifestation> {
        let new = draft.validate()?;
        self.write(|conn| insert_manifestation(conn, &new, generator, now))
    }

    pub fn get_by_id(&self, id: &str) -> Result<Manifestation> {
        self.read(|conn| load_by_id(conn, id))
    }

    pub fn get_by_protocolo(&self, protocolo: &str) -> Result<Manifestation> {
        self.read(|conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM manifestations WHERE protocolo = ?1",
                    params![protocolo],
                    |row| row.get(0),
                )
                .optional()?;
            match id {
                Some(id) => load_by_id(conn, &id),
                None => Err(OmbudsmanError::NotFound(format!(
                    "Manifestation with protocolo {} not found",
                    protocolo
                ))),
            }
        })
    }

    /// Newest-first keyset page over insertion order.
    ///
    /// The cursor is the insertion sequence of the last item served, so rows
    /// inserted after the first page was read never shift later pages.
    pub fn list(
        &self,
        filter: &ManifestationFilter,
        page: &PageRequest,
        limits: PageLimits,
    ) -> Result<Page<ManifestationSummary>> {
        let limit = limits.resolve(page.limit);
        let after = match page.cursor.as_deref() {
            Some(raw) => Some(parse_cursor(raw)?),
            None => None,
        };

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("m.status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(tipo) = filter.tipo {
            clauses.push("m.tipo = ?");
            values.push(Value::Text(tipo.as_str().to_string()));
        }
        if let Some(orgao) = filter.orgao.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
            clauses.push("m.orgao = ?");
            values.push(Value::Text(orgao.to_string()));
        }
        let filter_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        self.read(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM manifestations m {}", filter_sql),
                rusqlite::params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            let mut page_clauses = clauses.clone();
            let mut page_values = values.clone();
            if let Some(after) = after {
                page_clauses.push("m.seq < ?");
                page_values.push(Value::Integer(after));
            }
            // One extra row tells us whether another page exists.
            page_values.push(Value::Integer(i64::from(limit) + 1));
            let where_sql = if page_clauses.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", page_clauses.join(" AND "))
            };

            let mut stmt = conn.prepare(&format!(
                "SELECT m.seq, m.id, m.protocolo, m.tipo, m.status, m.orgao, m.assunto, m.anonimo,
                        m.created_at, m.updated_at,
                        (SELECT COUNT(*) FROM responses r WHERE r.manifestation_id = m.id)
                 FROM manifestations m {} ORDER BY m.seq DESC LIMIT ?",
                where_sql
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(page_values.iter()), |row| {
                Ok(SummaryRow {
                    seq: row.get(0)?,
                    id: row.get(1)?,
                    protocolo: row.get(2)?,
                    tipo: row.get(3)?,
                    status: row.get(4)?,
                    orgao: row.get(5)?,
                    assunto: row.get(6)?,
                    anonimo: row.get(7)?,
                    created_at: row.get(8)?,
                    updated_at: row.get(9)?,
                    respostas_count: row.get(10)?,
                })
            })?;

            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row?);
            }

            let has_more = summaries.len() > limit as usize;
            summaries.truncate(limit as usize);
            let next_cursor = if has_more {
                summaries.last().map(|s| s.seq.to_string())
            } else {
                None
            };

            let mut items = Vec::with_capacity(summaries.len());
            for row in summaries {
                items.push(row.into_summary()?);
            }
            Ok(Page {
                items,
                next_cursor,
                total,
            })
        })
    }
}

fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS manifestations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            protocolo TEXT NOT NULL,
            tipo TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'RECEBIDA'
                CHECK (status IN ('RECEBIDA', 'EM_ANALISE', 'RESPONDIDA', 'ARQUIVADA')),
            orgao TEXT NOT NULL,
            assunto TEXT NOT NULL,
            relato TEXT NOT NULL DEFAULT '',
            anonimo INTEGER NOT NULL DEFAULT 0,
            nome TEXT,
            email TEXT,
            telefone TEXT,
            data_fato TEXT,
            horario_fato TEXT,
            local TEXT,
            pessoas_envolvidas TEXT,
            audio_url TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (anonimo = 0 OR (nome IS NULL AND email IS NULL AND telefone IS NULL)),
            CHECK (updated_at >= created_at)
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            manifestation_id TEXT NOT NULL REFERENCES manifestations(id),
            position INTEGER NOT NULL,
            url TEXT NOT NULL,
            tipo TEXT NOT NULL CHECK (tipo IN ('IMAGEM', 'VIDEO', 'AUDIO')),
            UNIQUE(manifestation_id, position)
        );

        CREATE TABLE IF NOT EXISTS responses (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            manifestation_id TEXT NOT NULL REFERENCES manifestations(id),
            texto TEXT NOT NULL,
            gestor_nome TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS protocol_sequences (
            year INTEGER PRIMARY KEY,
            last_value INTEGER NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_manifestations_id ON manifestations(id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_manifestations_protocolo ON manifestations(protocolo);
        CREATE INDEX IF NOT EXISTS idx_manifestations_status ON manifestations(status, seq);
        CREATE INDEX IF NOT EXISTS idx_manifestations_tipo ON manifestations(tipo, seq);
        CREATE INDEX IF NOT EXISTS idx_manifestations_orgao ON manifestations(orgao, seq);
        CREATE INDEX IF NOT EXISTS idx_attachments_manifestation ON attachments(manifestation_id, position);
        CREATE INDEX IF NOT EXISTS idx_responses_manifestation ON responses(manifestation_id, seq);

        CREATE TRIGGER IF NOT EXISTS trg_manifestations_immutable
        BEFORE UPDATE ON manifestations
        WHEN NEW.id IS NOT OLD.id
          OR NEW.protocolo IS NOT OLD.protocolo
          OR NEW.tipo IS NOT OLD.tipo
          OR NEW.orgao IS NOT OLD.orgao
          OR NEW.assunto IS NOT OLD.assunto
          OR NEW.relato IS NOT OLD.relato
          OR NEW.anonimo IS NOT OLD.anonimo
          OR NEW.nome IS NOT OLD.nome
          OR NEW.email IS NOT OLD.email
          OR NEW.telefone IS NOT OLD.telefone
          OR NEW.data_fato IS NOT OLD.data_fato
          OR NEW.horario_fato IS NOT OLD.horario_fato
          OR NEW.local IS NOT OLD.local
          OR NEW.pessoas_envolvidas IS NOT OLD.pessoas_envolvidas
          OR NEW.audio_url IS NOT OLD.audio_url
          OR NEW.created_at IS NOT OLD.created_at
        BEGIN
            SELECT RAISE(ABORT, 'manifestation fields are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_manifestations_no_delete
        BEFORE DELETE ON manifestations
        BEGIN
            SELECT RAISE(ABORT, 'manifestations are never deleted');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_attachments_no_update
        BEFORE UPDATE ON attachments
        BEGIN
            SELECT RAISE(ABORT, 'attachments are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_attachments_no_delete
        BEFORE DELETE ON attachments
        BEGIN
            SELECT RAISE(ABORT, 'attachments are immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_responses_no_update
        BEFORE UPDATE ON responses
        BEGIN
            SELECT RAISE(ABORT, 'responses are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_responses_no_delete
        BEFORE DELETE ON responses
        BEGIN
            SELECT RAISE(ABORT, 'responses are append-only');
        END;
        ",
    )?;
    Ok(())
}

/// Default and ceiling for page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u32,
    pub max_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 100,
        }
    }
}

impl PageLimits {
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_size)
            .clamp(1, self.max_size.max(1))
    }
}

fn parse_cursor(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|seq| *seq > 0)
        .ok_or_else(|| OmbudsmanError::validation(format!("Invalid page cursor: {}", raw)))
}

// ── Row-level operations (run inside a caller's transaction) ──────────

/// Concurrency-relevant slice of a manifestation row.
#[derive(Debug, Clone)]
pub(crate) struct EntityState {
    pub id: String,
    pub status: Status,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn read_state(conn: &Connection, id: &str) -> Result<EntityState> {
    let row: Option<(String, String, i64, String)> = conn
        .query_row(
            "SELECT id, status, version, updated_at FROM manifestations WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    let (id, status, version, updated_at) = row.ok_or_else(|| not_found(id))?;
    Ok(EntityState {
        id,
        status: Status::from_str(&status).map_err(corrupt)?,
        version,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Conditional status write; fails with `Conflict` when `state` is stale.
pub(crate) fn write_status(
    conn: &Connection,
    state: &EntityState,
    status: Status,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE manifestations SET status = ?1, updated_at = ?2, version = version + 1
         WHERE id = ?3 AND version = ?4",
        params![
            status.as_str(),
            format_timestamp(updated_at),
            state.id,
            state.version
        ],
    )?;
    ensure_current(changed, state)
}

/// Append a response and bump the parent row; fails with `Conflict` when
/// `state` is stale.
pub(crate) fn insert_response(
    conn: &Connection,
    state: &EntityState,
    response: &StaffResponse,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE manifestations SET updated_at = ?1, version = version + 1
         WHERE id = ?2 AND version = ?3",
        params![format_timestamp(updated_at), state.id, state.version],
    )?;
    ensure_current(changed, state)?;
    conn.execute(
        "INSERT INTO responses (id, manifestation_id, texto, gestor_nome, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            response.id,
            state.id,
            response.texto,
            response.gestor_nome,
            format_timestamp(response.created_at)
        ],
    )?;
    Ok(())
}

fn ensure_current(changed: usize, state: &EntityState) -> Result<()> {
    if changed == 0 {
        return Err(OmbudsmanError::Conflict(format!(
            "Manifestation {} was modified concurrently (version {})",
            state.id, state.version
        )));
    }
    Ok(())
}

fn insert_manifestation(
    conn: &Connection,
    new: &NewManifestation,
    generator: &ProtocolGenerator,
    now: DateTime<Utc>,
) -> Result<Manifestation> {
    let id = Uuid::new_v4().to_string();
    let protocolo = generator.issue(conn, now)?;
    let stamp = format_timestamp(now);

    conn.execute(
        "INSERT INTO manifestations (id, protocolo, tipo, status, orgao, assunto, relato, anonimo,
            nome, email, telefone, data_fato, horario_fato, local, pessoas_envolvidas, audio_url,
            version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 0, ?17, ?17)",
        params![
            id,
            protocolo,
            new.tipo.as_str(),
            Status::Recebida.as_str(),
            new.orgao,
            new.assunto,
            new.relato,
            new.anonimo,
            new.nome,
            new.email,
            new.telefone,
            new.data_fato.map(|d| d.format("%Y-%m-%d").to_string()),
            new.horario_fato,
            new.local,
            new.pessoas_envolvidas,
            new.audio_url,
            stamp,
        ],
    )?;

    for (position, anexo) in new.anexos.iter().enumerate() {
        conn.execute(
            "INSERT INTO attachments (id, manifestation_id, position, url, tipo)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                id,
                position as i64,
                anexo.url,
                anexo.tipo.as_str()
            ],
        )?;
    }

    load_by_id(conn, &id)
}

pub(crate) fn load_by_id(conn: &Connection, id: &str) -> Result<Manifestation> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM manifestations WHERE id = ?1",
                MANIFESTATION_COLUMNS
            ),
            params![id],
            |row| {
                Ok(ManifestationRow {
                    id: row.get(0)?,
                    protocolo: row.get(1)?,
                    tipo: row.get(2)?,
                    status: row.get(3)?,
                    orgao: row.get(4)?,
                    assunto: row.get(5)?,
                    relato: row.get(6)?,
                    anonimo: row.get(7)?,
                    nome: row.get(8)?,
                    email: row.get(9)?,
                    telefone: row.get(10)?,
                    data_fato: row.get(11)?,
                    horario_fato: row.get(12)?,
                    local: row.get(13)?,
                    pessoas_envolvidas: row.get(14)?,
                    audio_url: row.get(15)?,
                    created_at: row.get(16)?,
                    updated_at: row.get(17)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| not_found(id))?;

    let anexos = load_attachments(conn, id)?;
    let respostas = load_responses(conn, id)?;
    row.into_manifestation(anexos, respostas)
}

fn load_attachments(conn: &Connection, manifestation_id: &str) -> Result<Vec<Attachment>> {
    let mut stmt = conn.prepare(
        "SELECT id, url, tipo FROM attachments WHERE manifestation_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![manifestation_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut anexos = Vec::new();
    for row in rows {
        let (id, url, tipo) = row?;
        anexos.push(Attachment {
            id,
            url,
            tipo: AttachmentKind::from_str(&tipo).map_err(corrupt)?,
        });
    }
    Ok(anexos)
}

fn load_responses(conn: &Connection, manifestation_id: &str) -> Result<Vec<StaffResponse>> {
    let mut stmt = conn.prepare(
        "SELECT id, texto, gestor_nome, created_at FROM responses
         WHERE manifestation_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![manifestation_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;
    let mut respostas = Vec::new();
    for row in rows {
        let (id, texto, gestor_nome, created_at) = row?;
        respostas.push(StaffResponse {
            id,
            texto,
            gestor_nome,
            created_at: parse_timestamp(&created_at)?,
        });
    }
    Ok(respostas)
}

fn not_found(id: &str) -> OmbudsmanError {
    OmbudsmanError::NotFound(format!("Manifestation {} not found", id))
}

/// A stored value that no longer parses is a storage fault, not bad input.
fn corrupt(err: OmbudsmanError) -> OmbudsmanError {
    OmbudsmanError::Database(anyhow::anyhow!("Corrupt manifestation row: {}", err))
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| OmbudsmanError::Database(anyhow::anyhow!("Invalid timestamp {:?}: {}", raw, e)))
}

// ── Row structs ───────────────────────────────────────────────────────

/// Intermediate row struct for manifestations.
struct ManifestationRow {
    id: String,
    protocolo: String,
    tipo: String,
    status: String,
    orgao: String,
    assunto: String,
    relato: String,
    anonimo: bool,
    nome: Option<String>,
    email: Option<String>,
    telefone: Option<String>,
    data_fato: Option<String>,
    horario_fato: Option<String>,
    local: Option<String>,
    pessoas_envolvidas: Option<String>,
    audio_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ManifestationRow {
    fn into_manifestation(
        self,
        anexos: Vec<Attachment>,
        respostas: Vec<StaffResponse>,
    ) -> Result<Manifestation> {
        let data_fato = match self.data_fato {
            Some(raw) => Some(NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                OmbudsmanError::Database(anyhow::anyhow!("Invalid data_fato {:?}: {}", raw, e))
            })?),
            None => None,
        };
        Ok(Manifestation {
            id: self.id,
            protocolo: self.protocolo,
            tipo: ManifestationKind::from_str(&self.tipo).map_err(corrupt)?,
            status: Status::from_str(&self.status).map_err(corrupt)?,
            orgao: self.orgao,
            assunto: self.assunto,
            relato: self.relato,
            anonimo: self.anonimo,
            nome: self.nome,
            email: self.email,
            telefone: self.telefone,
            data_fato,
            horario_fato: self.horario_fato,
            local: self.local,
            pessoas_envolvidas: self.pessoas_envolvidas,
            audio_url: self.audio_url,
            anexos,
            respostas,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Intermediate row struct for list queries.
struct SummaryRow {
    seq: i64,
    id: String,
    protocolo: String,
    tipo: String,
    status: String,
    orgao: String,
    assunto: String,
    anonimo: bool,
    created_at: String,
    updated_at: String,
    respostas_count: i64,
}

impl SummaryRow {
    fn into_summary(self) -> Result<ManifestationSummary> {
        let tipo = ManifestationKind::from_str(&self.tipo).map_err(corrupt)?;
        let status = Status::from_str(&self.status).map_err(corrupt)?;
        Ok(ManifestationSummary {
            id: self.id,
            protocolo: self.protocolo,
            tipo,
            tipo_label: tipo.label(),
            status,
            status_label: status.label(),
            orgao: self.orgao,
            assunto: self.assunto,
            anonimo: self.anonimo,
            respostas_count: self.respostas_count,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn create(db: &ManifestationDb, draft: ManifestationDraft) -> Result<Manifestation> {
        db.create(draft, &ProtocolGenerator::default(), ts("2025-04-02T09:30:00Z"))
    }

    fn anonymous(orgao: &str) -> ManifestationDraft {
        ManifestationDraft::anonymous(ManifestationKind::Reclamacao, orgao, "Iluminação pública")
    }

    #[test]
    fn test_create_database_and_run_migrations() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;

        let table_count: i32 = db.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
             ('manifestations', 'attachments', 'responses', 'protocol_sequences')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 4, "Expected 4 tables to exist");

        // Migrations are idempotent.
        run_migrations(&*db.conn()?)?;
        Ok(())
    }

    #[test]
    fn test_file_database_persists_across_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ouvidoria.db");
        let created = {
            let db = ManifestationDb::new(&path)?;
            create(&db, anonymous("Secretaria de Obras"))?
        };
        let reopened = ManifestationDb::new(&path)?;
        let fetched = reopened.get_by_protocolo(&created.protocolo)?;
        assert_eq!(fetched, created);

        let next = create(&reopened, anonymous("Secretaria de Obras"))?;
        assert_eq!(next.protocolo, "2025-000002");
        Ok(())
    }

    #[test]
    fn test_file_database_reads_while_another_connection_writes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ouvidoria.db");
        let db = ManifestationDb::with_pool_size(&path, 2)?;
        let m = create(&db, anonymous("Secretaria X"))?;

        let mode: String = db.conn()?.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        assert_eq!(mode, "wal");

        let blocker = Connection::open(&path)?;
        blocker.execute_batch("BEGIN IMMEDIATE")?;
        let started = std::time::Instant::now();
        assert_eq!(db.get_by_id(&m.id)?.protocolo, m.protocolo);
        assert!(started.elapsed() < BUSY_TIMEOUT);
        blocker.execute_batch("ROLLBACK")?;
        Ok(())
    }

    #[test]
    fn test_create_assigns_defaults() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let draft = ManifestationDraft::identified(
            ManifestationKind::Solicitacao,
            "Secretaria de Saúde",
            "Vacinação",
            "João",
        )
        .with_email("joao@example.org")
        .with_relato("Quando abre o posto?")
        .with_attachment("s3://ouvidoria/a.jpg", AttachmentKind::Imagem)
        .with_attachment("s3://ouvidoria/b.mp3", AttachmentKind::Audio);

        let m = create(&db, draft)?;
        assert_eq!(m.status, Status::Recebida);
        assert_eq!(m.protocolo, "2025-000001");
        assert_eq!(m.created_at, m.updated_at);
        assert_eq!(m.created_at, ts("2025-04-02T09:30:00Z"));
        assert_eq!(m.nome.as_deref(), Some("João"));
        assert_eq!(m.anexos.len(), 2);
        assert_eq!(m.anexos[0].tipo, AttachmentKind::Imagem);
        assert_eq!(m.anexos[1].url, "s3://ouvidoria/b.mp3");
        assert!(m.respostas.is_empty());
        assert!(Uuid::parse_str(&m.id).is_ok());
        Ok(())
    }

    #[test]
    fn test_invalid_draft_writes_nothing() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let err = create(&db, anonymous("  ")).unwrap_err();
        assert!(matches!(err, OmbudsmanError::Validation(_)));

        let count: i64 = db
            .conn()?
            .query_row("SELECT COUNT(*) FROM manifestations", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        let sequences: i64 = db
            .conn()?
            .query_row("SELECT COUNT(*) FROM protocol_sequences", [], |row| row.get(0))?;
        assert_eq!(sequences, 0);
        Ok(())
    }

    #[test]
    fn test_anonymous_rows_never_store_contact() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let mut draft = anonymous("Secretaria X");
        draft.nome = Some("Fulano".into());
        draft.telefone = Some("123".into());
        let m = create(&db, draft)?;
        assert!(m.nome.is_none() && m.email.is_none() && m.telefone.is_none());

        let raw = db.conn()?.execute(
            "INSERT INTO manifestations (id, protocolo, tipo, orgao, assunto, anonimo, nome, created_at, updated_at)
             VALUES ('x', '2025-999999', 'ELOGIO', 'o', 'a', 1, 'leak', '2025-01-01T00:00:00.000000Z', '2025-01-01T00:00:00.000000Z')",
            [],
        );
        assert!(raw.is_err(), "CHECK constraint must reject contact data on anonymous rows");
        Ok(())
    }

    #[test]
    fn test_get_missing_is_not_found() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        assert!(matches!(db.get_by_id("nope"), Err(OmbudsmanError::NotFound(_))));
        assert!(matches!(
            db.get_by_protocolo("2025-000001"),
            Err(OmbudsmanError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_protocolo_lookup_is_exact_and_indexed() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let m = create(&db, anonymous("Secretaria X"))?;

        assert_eq!(db.get_by_protocolo(&m.protocolo)?.id, m.id);
        assert!(db.get_by_protocolo(&format!(" {}", m.protocolo)).is_err());
        assert!(db.get_by_protocolo("2025-00000").is_err());

        let plan: String = db.conn()?.query_row(
            "EXPLAIN QUERY PLAN SELECT id FROM manifestations WHERE protocolo = '2025-000001'",
            [],
            |row| row.get(3),
        )?;
        assert!(plan.contains("idx_manifestations_protocolo"), "plan was: {}", plan);
        Ok(())
    }

    #[test]
    fn test_identity_fields_are_immutable() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let m = create(&db, anonymous("Secretaria X"))?;

        let changed_protocol = db.conn()?.execute(
            "UPDATE manifestations SET protocolo = '2025-777777' WHERE id = ?1",
            params![m.id],
        );
        assert!(changed_protocol.is_err());
        let changed_orgao = db.conn()?.execute(
            "UPDATE manifestations SET orgao = 'Outro' WHERE id = ?1",
            params![m.id],
        );
        assert!(changed_orgao.is_err());
        let deleted = db
            .conn()?
            .execute("DELETE FROM manifestations WHERE id = ?1", params![m.id]);
        assert!(deleted.is_err());
        Ok(())
    }

    #[test]
    fn test_responses_are_append_only_in_storage() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let m = create(&db, anonymous("Secretaria X"))?;
        let response = StaffResponse {
            id: Uuid::new_v4().to_string(),
            texto: "Recebido".into(),
            gestor_nome: None,
            created_at: ts("2025-04-02T10:00:00Z"),
        };
        db.write(|conn| {
            let state = read_state(conn, &m.id)?;
            insert_response(conn, &state, &response, ts("2025-04-02T10:00:00Z"))
        })?;

        assert!(
            db.conn()?
                .execute("UPDATE responses SET texto = 'editado'", [])
                .is_err()
        );
        assert!(db.conn()?.execute("DELETE FROM responses", []).is_err());
        assert_eq!(db.get_by_id(&m.id)?.respostas[0].texto, "Recebido");
        Ok(())
    }

    #[test]
    fn test_stale_version_write_is_a_conflict() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let m = create(&db, anonymous("Secretaria X"))?;
        let stale = db.read(|conn| read_state(conn, &m.id))?;

        db.write(|conn| {
            write_status(conn, &stale, Status::EmAnalise, ts("2025-04-02T11:00:00Z"))
        })?;
        let err = db
            .write(|conn| {
                write_status(conn, &stale, Status::Arquivada, ts("2025-04-02T11:00:01Z"))
            })
            .unwrap_err();
        assert!(matches!(err, OmbudsmanError::Conflict(_)));
        assert_eq!(db.get_by_id(&m.id)?.status, Status::EmAnalise);
        Ok(())
    }

    #[test]
    fn test_protocols_are_unique() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..25 {
            let m = create(&db, anonymous("Secretaria X"))?;
            assert!(crate::ombudsman::protocol::is_well_formed(&m.protocolo));
            assert!(seen.insert(m.protocolo));
        }
        Ok(())
    }

    #[test]
    fn test_list_filters_by_status_tipo_and_orgao() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let a = create(&db, anonymous("Secretaria A"))?;
        create(&db, anonymous("Secretaria B"))?;
        create(
            &db,
            ManifestationDraft::anonymous(ManifestationKind::Elogio, "Secretaria A", "Obrigado"),
        )?;
        db.write(|conn| {
            let state = read_state(conn, &a.id)?;
            write_status(conn, &state, Status::Arquivada, ts("2025-04-03T00:00:00Z"))
        })?;

        let limits = PageLimits::default();
        let by_orgao = db.list(
            &ManifestationFilter {
                orgao: Some("Secretaria A".into()),
                ..Default::default()
            },
            &PageRequest::default(),
            limits,
        )?;
        assert_eq!(by_orgao.total, 2);

        let by_tipo = db.list(
            &ManifestationFilter {
                tipo: Some(ManifestationKind::Elogio),
                ..Default::default()
            },
            &PageRequest::default(),
            limits,
        )?;
        assert_eq!(by_tipo.items.len(), 1);
        assert_eq!(by_tipo.items[0].tipo_label, "Elogio");

        let archived = db.list(
            &ManifestationFilter {
                status: Some(Status::Arquivada),
                orgao: Some("Secretaria A".into()),
                ..Default::default()
            },
            &PageRequest::default(),
            limits,
        )?;
        assert_eq!(archived.items.len(), 1);
        assert_eq!(archived.items[0].id, a.id);
        Ok(())
    }

    #[test]
    fn test_pagination_is_stable_under_inserts() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        for _ in 0..5 {
            create(&db, anonymous("Secretaria X"))?;
        }
        let limits = PageLimits::default();
        let filter = ManifestationFilter::default();

        let first = db.list(
            &filter,
            &PageRequest {
                limit: Some(2),
                cursor: None,
            },
            limits,
        )?;
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].protocolo, "2025-000005");
        let cursor = first.next_cursor.clone().expect("more pages");

        // New submissions land in front of the first page, not inside later ones.
        create(&db, anonymous("Secretaria X"))?;
        create(&db, anonymous("Secretaria X"))?;

        let mut seen: Vec<String> = first.items.iter().map(|s| s.protocolo.clone()).collect();
        let mut cursor = Some(cursor);
        while let Some(c) = cursor {
            let page = db.list(
                &filter,
                &PageRequest {
                    limit: Some(2),
                    cursor: Some(c),
                },
                limits,
            )?;
            seen.extend(page.items.iter().map(|s| s.protocolo.clone()));
            cursor = page.next_cursor;
        }
        assert_eq!(
            seen,
            vec![
                "2025-000005",
                "2025-000004",
                "2025-000003",
                "2025-000002",
                "2025-000001"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_list_rejects_garbage_cursor() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let err = db
            .list(
                &ManifestationFilter::default(),
                &PageRequest {
                    limit: None,
                    cursor: Some("abc".into()),
                },
                PageLimits::default(),
            )
            .unwrap_err();
        assert!(matches!(err, OmbudsmanError::Validation(_)));
        Ok(())
    }

    #[test]
    fn test_page_limits_clamp() {
        let limits = PageLimits {
            default_size: 20,
            max_size: 50,
        };
        assert_eq!(limits.resolve(None), 20);
        assert_eq!(limits.resolve(Some(0)), 1);
        assert_eq!(limits.resolve(Some(500)), 50);
    }

    #[test]
    fn test_summary_counts_responses() -> anyhow::Result<()> {
        let db = ManifestationDb::new_in_memory()?;
        let m = create(&db, anonymous("Secretaria X"))?;
        for texto in ["um", "dois"] {
            let response = StaffResponse {
                id: Uuid::new_v4().to_string(),
                texto: texto.into(),
                gestor_nome: Some("Ana".into()),
                created_at: ts("2025-04-02T10:00:00Z"),
            };
            db.write(|conn| {
                let state = read_state(conn, &m.id)?;
                insert_response(conn, &state, &response, ts("2025-04-02T10:00:00Z"))
            })?;
        }
        let page = db.list(
            &ManifestationFilter::default(),
            &PageRequest::default(),
            PageLimits::default(),
        )?;
        assert_eq!(page.items[0].respostas_count, 2);
        assert!(page.next_cursor.is_none());
        Ok(())
    }

    #[test]
    fn test_timestamp_text_round_trips() -> anyhow::Result<()> {
        let original = ts("2025-04-02T09:30:00.123456Z");
        assert_eq!(parse_timestamp(&format_timestamp(original))?, original);
        Ok(())
    }
}
