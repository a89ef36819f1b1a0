//! SQLite-backed store.
//!
//! Terminals keep their capability and verification maps as JSON text so
//! keys outside the derived vocabulary round-trip untouched. Attempts use one
//! column per dimension; enumerated columns are read forgivingly, so a value
//! this build does not recognize reads as absent.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use terminal_capability::{Attempt, Provenance, Terminal};

use super::{ensure_unique_ids, IngestReport, StoreError, TerminalStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS terminals (
    id TEXT PRIMARY KEY,
    capabilities TEXT NOT NULL DEFAULT '{}',
    verification TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'active',
    has_been_refreshed INTEGER NOT NULL DEFAULT 0,
    refreshed_at TEXT,
    refreshed_by TEXT,
    refreshed_attempt_count INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS attempts (
    id TEXT PRIMARY KEY,
    terminal_id TEXT NOT NULL,
    submitted_by TEXT,
    sequence_number INTEGER NOT NULL,
    result TEXT NOT NULL,
    is_conclusive_failure INTEGER NOT NULL DEFAULT 0,
    payment_method TEXT,
    card_network TEXT,
    cvm TEXT,
    acquiring_mode TEXT,
    device_status TEXT,
    acquiring_institution TEXT,
    checkout_location TEXT,
    notes TEXT,
    observed_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS attempts_by_terminal ON attempts (terminal_id, sequence_number);
";

/// Store backed by a SQLite database.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("creating {}: {}", parent.display(), e)))?;
        }
        let db = Connection::open(path)?;

        // Enable WAL mode for concurrent read access
        db.execute_batch("PRAGMA journal_mode=WAL;")?;

        info!(path = %path.display(), "Terminal store opened");
        Self::init(db)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(SCHEMA)?;
        Ok(Self { db: Mutex::new(db) })
    }
}

fn lenient<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| s.parse().ok())
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const ATTEMPT_COLUMNS: &str = "id, terminal_id, submitted_by, sequence_number, result, \
    is_conclusive_failure, payment_method, card_network, cvm, acquiring_mode, device_status, \
    acquiring_institution, checkout_location, notes, observed_at, created_at";

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<Attempt> {
    let observed_at: Option<String> = row.get(14)?;
    let created_at: String = row.get(15)?;
    Ok(Attempt {
        id: row.get(0)?,
        terminal_id: row.get(1)?,
        submitted_by: row.get(2)?,
        sequence_number: row.get::<_, i64>(3)? as u64,
        result: lenient(row.get(4)?).unwrap_or_default(),
        is_conclusive_failure: row.get(5)?,
        payment_method: lenient(row.get(6)?),
        card_network: row.get(7)?,
        cvm: lenient(row.get(8)?),
        acquiring_mode: lenient(row.get(9)?),
        device_status: lenient(row.get(10)?),
        acquiring_institution: row.get(11)?,
        checkout_location: lenient(row.get(12)?),
        notes: row.get(13)?,
        observed_at: observed_at.as_deref().map(|s| parse_time(14, s)).transpose()?,
        created_at: parse_time(15, &created_at)?,
    })
}

/// Raw terminal columns; JSON decoding happens outside the row callback.
struct TerminalRow {
    id: String,
    capabilities: String,
    verification: String,
    status: Option<String>,
    has_been_refreshed: bool,
    refreshed_at: Option<String>,
    refreshed_by: Option<String>,
    refreshed_attempt_count: i64,
    version: i64,
}

impl TerminalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            capabilities: row.get(1)?,
            verification: row.get(2)?,
            status: row.get(3)?,
            has_been_refreshed: row.get(4)?,
            refreshed_at: row.get(5)?,
            refreshed_by: row.get(6)?,
            refreshed_attempt_count: row.get(7)?,
            version: row.get(8)?,
        })
    }

    fn into_terminal(self) -> Result<Terminal, StoreError> {
        let refreshed_at = self
            .refreshed_at
            .as_deref()
            .map(|s| parse_time(5, s))
            .transpose()?;
        Ok(Terminal {
            id: self.id,
            capabilities: serde_json::from_str(&self.capabilities)?,
            verification: serde_json::from_str(&self.verification)?,
            status: lenient(self.status).unwrap_or_default(),
            provenance: Provenance {
                has_been_refreshed: self.has_been_refreshed,
                refreshed_at,
                refreshed_by: self.refreshed_by,
                refreshed_attempt_count: self.refreshed_attempt_count as u64,
            },
            version: self.version as u64,
        })
    }
}

/// Insert a terminal unless one with the same ID exists. Returns whether a row was written.
fn insert_terminal_row(db: &Connection, terminal: &Terminal) -> Result<bool, StoreError> {
    let capabilities = serde_json::to_string(&terminal.capabilities)?;
    let verification = serde_json::to_string(&terminal.verification)?;

    let inserted = db.execute(
        "INSERT INTO terminals (id, capabilities, verification, status, has_been_refreshed,
                                refreshed_at, refreshed_by, refreshed_attempt_count, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO NOTHING",
        params![
            terminal.id,
            capabilities,
            verification,
            terminal.status.as_str(),
            terminal.provenance.has_been_refreshed,
            terminal.provenance.refreshed_at.map(|t| t.to_rfc3339()),
            terminal.provenance.refreshed_by,
            terminal.provenance.refreshed_attempt_count as i64,
            terminal.version as i64,
        ],
    )?;
    Ok(inserted > 0)
}

/// Insert an attempt, assigning the next sequence number for its terminal.
fn insert_attempt_row(db: &Connection, attempt: &mut Attempt) -> Result<(), StoreError> {
    let exists: bool = db.query_row(
        "SELECT EXISTS(SELECT 1 FROM attempts WHERE id = ?1)",
        [&attempt.id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(StoreError::DuplicateAttempt(attempt.id.clone()));
    }

    let next: i64 = db.query_row(
        "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM attempts WHERE terminal_id = ?1",
        [&attempt.terminal_id],
        |row| row.get(0),
    )?;
    attempt.sequence_number = next as u64;

    db.execute(
        &format!(
            "INSERT INTO attempts ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            ATTEMPT_COLUMNS
        ),
        params![
            attempt.id,
            attempt.terminal_id,
            attempt.submitted_by,
            next,
            attempt.result.as_str(),
            attempt.is_conclusive_failure,
            attempt.payment_method.map(|v| v.as_str()),
            attempt.card_network,
            attempt.cvm.map(|v| v.as_str()),
            attempt.acquiring_mode.map(|v| v.as_str()),
            attempt.device_status.map(|v| v.as_str()),
            attempt.acquiring_institution,
            attempt.checkout_location.map(|v| v.as_str()),
            attempt.notes,
            attempt.observed_at.map(|t| t.to_rfc3339()),
            attempt.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl TerminalStore for SqliteStore {
    async fn get_terminal(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT id, capabilities, verification, status, has_been_refreshed,
                        refreshed_at, refreshed_by, refreshed_attempt_count, version
                 FROM terminals WHERE id = ?1",
                [terminal_id],
                TerminalRow::from_row,
            )
            .optional()?;
        row.map(TerminalRow::into_terminal).transpose()
    }

    async fn list_attempts(&self, terminal_id: &str) -> Result<Vec<Attempt>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare_cached(&format!(
            "SELECT {} FROM attempts WHERE terminal_id = ?1 ORDER BY sequence_number",
            ATTEMPT_COLUMNS
        ))?;
        let attempts = stmt
            .query_map([terminal_id], attempt_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    async fn update_terminal(
        &self,
        terminal: &Terminal,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let capabilities = serde_json::to_string(&terminal.capabilities)?;
        let verification = serde_json::to_string(&terminal.verification)?;

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let updated = tx.execute(
            "UPDATE terminals
             SET capabilities = ?2, verification = ?3, status = ?4, has_been_refreshed = ?5,
                 refreshed_at = ?6, refreshed_by = ?7, refreshed_attempt_count = ?8,
                 version = version + 1
             WHERE id = ?1 AND (?9 IS NULL OR version = ?9)",
            params![
                terminal.id,
                capabilities,
                verification,
                terminal.status.as_str(),
                terminal.provenance.has_been_refreshed,
                terminal.provenance.refreshed_at.map(|t| t.to_rfc3339()),
                terminal.provenance.refreshed_by,
                terminal.provenance.refreshed_attempt_count as i64,
                expected_version.map(|v| v as i64),
            ],
        )?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM terminals WHERE id = ?1",
                [&terminal.id],
                |row| row.get(0),
            )
            .optional()?;

        let version = match (updated, current, expected_version) {
            (0, None, _) => return Err(StoreError::NotFound(terminal.id.clone())),
            (0, Some(actual), Some(expected)) => {
                return Err(StoreError::Conflict {
                    terminal_id: terminal.id.clone(),
                    expected,
                    actual: actual as u64,
                })
            }
            (_, Some(version), _) => version as u64,
            (_, None, _) => {
                return Err(StoreError::Backend(format!(
                    "terminal {} vanished during update",
                    terminal.id
                )))
            }
        };
        tx.commit()?;

        debug!(terminal_id = %terminal.id, version, "Terminal updated");
        Ok(version)
    }

    async fn list_terminal_ids(&self) -> Result<Vec<String>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare_cached("SELECT id FROM terminals ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    async fn insert_terminal(&self, terminal: &Terminal) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        if !insert_terminal_row(&db, terminal)? {
            return Err(StoreError::AlreadyExists(terminal.id.clone()));
        }
        debug!(terminal_id = %terminal.id, "Terminal inserted");
        Ok(())
    }

    async fn append_attempt(&self, mut attempt: Attempt) -> Result<Attempt, StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        insert_attempt_row(&tx, &mut attempt)?;
        tx.commit()?;

        debug!(
            terminal_id = %attempt.terminal_id,
            attempt_id = %attempt.id,
            sequence_number = attempt.sequence_number,
            "Attempt recorded"
        );
        Ok(attempt)
    }

    async fn ingest_attempts(
        &self,
        mut attempts: Vec<Attempt>,
    ) -> Result<IngestReport, StoreError> {
        ensure_unique_ids(&attempts)?;
        let terminals: BTreeSet<String> =
            attempts.iter().map(|a| a.terminal_id.clone()).collect();

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;

        let mut terminals_created = Vec::new();
        for terminal_id in &terminals {
            if insert_terminal_row(&tx, &Terminal::new(terminal_id.clone()))? {
                terminals_created.push(terminal_id.clone());
            }
        }
        for attempt in attempts.iter_mut() {
            insert_attempt_row(&tx, attempt)?;
        }
        tx.commit()?;

        debug!(
            attempts = attempts.len(),
            terminals_created = terminals_created.len(),
            "Attempt batch recorded"
        );
        Ok(IngestReport {
            attempts,
            terminals_created,
            terminals: terminals.into_iter().collect(),
        })
    }
}
