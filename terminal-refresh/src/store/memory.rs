//! In-memory store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;
use tracing::debug;

use terminal_capability::{Attempt, Terminal};

use super::{ensure_unique_ids, IngestReport, StoreError, TerminalStore};

/// Store backed by concurrent maps. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    terminals: DashMap<String, Terminal>,
    attempts: DashMap<String, Vec<Attempt>>,
    attempt_ids: DashSet<String>,
    /// Serializes attempt writers so a batch is checked and applied as one step
    attempt_writes: Mutex<()>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_unrecorded(&self, attempt: &Attempt) -> Result<(), StoreError> {
        if self.attempt_ids.contains(attempt.id.as_str()) {
            return Err(StoreError::DuplicateAttempt(attempt.id.clone()));
        }
        Ok(())
    }

    fn record_attempt(&self, mut attempt: Attempt) -> Attempt {
        self.attempt_ids.insert(attempt.id.clone());
        let mut history = self.attempts.entry(attempt.terminal_id.clone()).or_default();
        attempt.sequence_number = history
            .iter()
            .map(|a| a.sequence_number)
            .max()
            .unwrap_or(0)
            + 1;
        history.push(attempt.clone());
        attempt
    }
}

#[async_trait]
impl TerminalStore for MemoryStore {
    async fn get_terminal(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError> {
        Ok(self.terminals.get(terminal_id).map(|t| t.clone()))
    }

    async fn list_attempts(&self, terminal_id: &str) -> Result<Vec<Attempt>, StoreError> {
        Ok(self
            .attempts
            .get(terminal_id)
            .map(|history| history.clone())
            .unwrap_or_default())
    }

    async fn update_terminal(
        &self,
        terminal: &Terminal,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut stored = self
            .terminals
            .get_mut(&terminal.id)
            .ok_or_else(|| StoreError::NotFound(terminal.id.clone()))?;

        if let Some(expected) = expected_version {
            if stored.version != expected {
                return Err(StoreError::Conflict {
                    terminal_id: terminal.id.clone(),
                    expected,
                    actual: stored.version,
                });
            }
        }

        let version = stored.version + 1;
        let mut record = terminal.clone();
        record.version = version;
        *stored = record;

        debug!(terminal_id = %terminal.id, version, "Terminal updated");
        Ok(version)
    }

    async fn list_terminal_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.terminals.iter().map(|t| t.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn insert_terminal(&self, terminal: &Terminal) -> Result<(), StoreError> {
        match self.terminals.entry(terminal.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(terminal.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(terminal.clone());
                Ok(())
            }
        }
    }

    async fn append_attempt(&self, attempt: Attempt) -> Result<Attempt, StoreError> {
        let _writer = self.attempt_writes.lock().await;
        self.ensure_unrecorded(&attempt)?;
        let attempt = self.record_attempt(attempt);

        debug!(
            terminal_id = %attempt.terminal_id,
            attempt_id = %attempt.id,
            sequence_number = attempt.sequence_number,
            "Attempt recorded"
        );
        Ok(attempt)
    }

    async fn ingest_attempts(&self, attempts: Vec<Attempt>) -> Result<IngestReport, StoreError> {
        let _writer = self.attempt_writes.lock().await;
        ensure_unique_ids(&attempts)?;
        for attempt in &attempts {
            self.ensure_unrecorded(attempt)?;
        }

        let terminals: BTreeSet<String> =
            attempts.iter().map(|a| a.terminal_id.clone()).collect();
        let mut terminals_created = Vec::new();
        for terminal_id in &terminals {
            if let Entry::Vacant(slot) = self.terminals.entry(terminal_id.clone()) {
                slot.insert(Terminal::new(terminal_id.clone()));
                terminals_created.push(terminal_id.clone());
            }
        }

        let attempts: Vec<Attempt> = attempts
            .into_iter()
            .map(|attempt| self.record_attempt(attempt))
            .collect();

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
