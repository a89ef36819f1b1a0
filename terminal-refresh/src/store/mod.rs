//! Persistence boundary for terminals and their attempts.
//!
//! The refresh orchestrator reads a terminal and its attempt history through
//! [`TerminalStore`] and writes the derived record back in a single call.
//! Backends:
//!
//! - [`MemoryStore`]: in-process, for tests and embedding
//! - [`SqliteStore`]: SQLite database file

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

use terminal_capability::{Attempt, Terminal};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Terminal does not exist
    #[error("Terminal not found: {0}")]
    NotFound(String),

    /// Terminal was written by someone else since it was read
    #[error("Version conflict on terminal {terminal_id}: expected {expected}, found {actual}")]
    Conflict {
        terminal_id: String,
        expected: u64,
        actual: u64,
    },

    /// Terminal already exists
    #[error("Terminal already exists: {0}")]
    AlreadyExists(String),

    /// Attempt ID is already recorded, or repeated within one batch
    #[error("Duplicate attempt: {0}")]
    DuplicateAttempt(String),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Read and write access to terminals and their attempt histories.
#[async_trait]
pub trait TerminalStore: Send + Sync {
    /// Fetch a terminal by ID.
    async fn get_terminal(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError>;

    /// Full attempt history of a terminal, in no particular order.
    async fn list_attempts(&self, terminal_id: &str) -> Result<Vec<Attempt>, StoreError>;

    /// Replace a terminal record and return its new version.
    ///
    /// With `expected_version`, the write fails with [`StoreError::Conflict`]
    /// unless the stored version still matches. A failed write changes
    /// nothing.
    async fn update_terminal(
        &self,
        terminal: &Terminal,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// IDs of every stored terminal.
    async fn list_terminal_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Create a terminal.
    async fn insert_terminal(&self, terminal: &Terminal) -> Result<(), StoreError>;

    /// Record an attempt, assigning its per-terminal sequence number.
    async fn append_attempt(&self, attempt: Attempt) -> Result<Attempt, StoreError>;

    /// Record a batch of attempts, creating terminals that do not exist yet.
    ///
    /// All or nothing: if any attempt is rejected, no attempt is recorded and
    /// no terminal is created.
    async fn ingest_attempts(&self, attempts: Vec<Attempt>) -> Result<IngestReport, StoreError>;
}

/// Result of [`TerminalStore::ingest_attempts`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Attempts as recorded, with sequence numbers assigned
    pub attempts: Vec<Attempt>,
    /// Terminals the batch created
    pub terminals_created: Vec<String>,
    /// Every terminal the batch touched, sorted
    pub terminals: Vec<String>,
}

/// Reject a batch that repeats an attempt ID.
pub(crate) fn ensure_unique_ids(attempts: &[Attempt]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(attempts.len());
    for attempt in attempts {
        if !seen.insert(attempt.id.as_str()) {
            return Err(StoreError::DuplicateAttempt(attempt.id.clone()));
        }
    }
    Ok(())
}
