//! Refresh orchestration.
//!
//! A refresh reads one terminal and its full attempt history, reconciles
//! them in memory, writes the derived record back in a single store call and
//! stamps provenance. Batches refresh terminals independently and in
//! parallel; one terminal's failure never stops the others.
//!
//! Concurrent refreshes of the same terminal are last-writer-wins unless
//! `consistency.optimistic` is set, in which case a write against a record
//! that changed since it was read fails with a version conflict.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use terminal_capability::{reconcile_terminal_with, DeviceStatus, Provenance, TerminalSnapshot};

use crate::config::RefreshConfig;
use crate::fingerprint::fingerprint;
use crate::store::{StoreError, TerminalStore};

/// Error types for refresh operations.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Terminal does not exist
    #[error("Terminal not found: {0}")]
    TerminalNotFound(String),

    /// Read or write against the store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Derived state could not be fingerprinted
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RefreshError>;

/// Result of refreshing one terminal.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub terminal_id: String,
    /// State written to the terminal
    pub snapshot: TerminalSnapshot,
    /// Attempts the pass read
    pub attempt_count: usize,
    /// Provenance stamped on the terminal
    pub provenance: Provenance,
    /// Fingerprint of the derived state after the refresh
    pub fingerprint: String,
    /// Derived state differs from what was stored before
    pub changed: bool,
    /// Terminal moved from active to inactive in this pass
    pub demoted: bool,
    /// Record version after the write
    pub version: u64,
}

/// A terminal a batch could not refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshFailure {
    pub terminal_id: String,
    pub error: String,
}

/// Result of a batch refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Successful refreshes, in request order
    pub outcomes: Vec<RefreshOutcome>,
    /// Failed refreshes, in request order
    pub failures: Vec<RefreshFailure>,
    /// Terminals demoted by the success-rate policy
    pub demoted: usize,
    /// Terminals whose derived state changed
    pub changed: usize,
}

impl BatchReport {
    /// Whether every terminal was refreshed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs reconciliation against a [`TerminalStore`].
pub struct Refresher {
    store: Arc<dyn TerminalStore>,
    config: RefreshConfig,
    /// Concurrency limiter for batches
    semaphore: Arc<Semaphore>,
}

impl Refresher {
    /// Create a refresher with default configuration.
    pub fn new(store: Arc<dyn TerminalStore>) -> Self {
        Self::with_config(store, RefreshConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(store: Arc<dyn TerminalStore>, config: RefreshConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.batch.max_concurrent.max(1)));
        Self {
            store,
            config,
            semaphore,
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TerminalStore> {
        &self.store
    }

    /// Reconcile a terminal without writing anything.
    pub async fn preview_terminal(&self, terminal_id: &str) -> Result<TerminalSnapshot> {
        let terminal = self
            .store
            .get_terminal(terminal_id)
            .await?
            .ok_or_else(|| RefreshError::TerminalNotFound(terminal_id.to_string()))?;
        let attempts = self.store.list_attempts(terminal_id).await?;
        Ok(reconcile_terminal_with(
            &terminal,
            &attempts,
            &self.config.success_rate,
        ))
    }

    /// Recompute and persist one terminal's derived state.
    ///
    /// Either the whole record is written with fresh provenance, or nothing
    /// is written and the error is returned.
    pub async fn refresh_terminal(&self, terminal_id: &str, actor: &str) -> Result<RefreshOutcome> {
        let terminal = self
            .store
            .get_terminal(terminal_id)
            .await?
            .ok_or_else(|| RefreshError::TerminalNotFound(terminal_id.to_string()))?;
        let attempts = self.store.list_attempts(terminal_id).await?;

        let snapshot = reconcile_terminal_with(&terminal, &attempts, &self.config.success_rate);
        let previous = fingerprint(&terminal.derived())?;
        let current = fingerprint(&snapshot.derived())?;

        let provenance = Provenance::stamp(actor, attempts.len(), Utc::now());
        let mut updated = terminal.clone();
        updated.apply_snapshot(&snapshot);
        updated.provenance = provenance.clone();

        let expected_version = self
            .config
            .consistency
            .optimistic
            .then_some(terminal.version);
        let version = self.store.update_terminal(&updated, expected_version).await?;

        let demoted = snapshot.success_rate.demote && terminal.status != DeviceStatus::Inactive;
        if demoted {
            warn!(
                terminal_id = %terminal_id,
                success_rate = snapshot.success_rate.success_rate,
                total_attempts = snapshot.success_rate.total_attempts,
                "Terminal demoted for low success rate"
            );
        }

        info!(
            terminal_id = %terminal_id,
            actor = %actor,
            attempt_count = attempts.len(),
            changed = previous != current,
            version,
            "Terminal refreshed"
        );

        Ok(RefreshOutcome {
            terminal_id: terminal_id.to_string(),
            snapshot,
            attempt_count: attempts.len(),
            provenance,
            changed: previous != current,
            fingerprint: current,
            demoted,
            version,
        })
    }

    /// Refresh many terminals, isolating failures.
    pub async fn refresh_batch(&self, terminal_ids: &[String], actor: &str) -> BatchReport {
        debug!(count = terminal_ids.len(), "Starting batch refresh");

        let tasks = terminal_ids.iter().map(|terminal_id| async move {
            let _permit = self.semaphore.acquire().await.ok();
            (terminal_id, self.refresh_terminal(terminal_id, actor).await)
        });

        let mut report = BatchReport::default();
        for (terminal_id, result) in join_all(tasks).await {
            match result {
                Ok(outcome) => {
                    report.demoted += usize::from(outcome.demoted);
                    report.changed += usize::from(outcome.changed);
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(terminal_id = %terminal_id, error = %e, "Terminal refresh failed");
                    report.failures.push(RefreshFailure {
                        terminal_id: terminal_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            refreshed = report.outcomes.len(),
            failed = report.failures.len(),
            demoted = report.demoted,
            changed = report.changed,
            "Batch refresh complete"
        );
        report
    }

    /// Refresh every terminal the store knows about.
    pub async fn refresh_all(&self, actor: &str) -> Result<BatchReport> {
        let terminal_ids = self.store.list_terminal_ids().await?;
        Ok(self.refresh_batch(&terminal_ids, actor).await)
    }
}
