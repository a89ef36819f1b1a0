//! Refresh orchestration and persistence for derived terminal capabilities.
//!
//! [`Refresher`] loads a terminal and its attempt history from a
//! [`TerminalStore`], runs [`terminal_capability::reconcile_terminal_with`],
//! writes the result back and stamps provenance. Batch and sweep refreshes
//! run terminals in parallel with failures isolated per terminal.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use terminal_refresh::{Refresher, SqliteStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open(Path::new("terminals.db"))?);
//! let refresher = Refresher::new(store);
//!
//! let report = refresher.refresh_all("nightly-sweep").await?;
//! println!("{} demoted", report.demoted);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod fingerprint;
pub mod refresher;
pub mod store;

pub use config::{BatchConfig, ConsistencyConfig, RefreshConfig};
pub use fingerprint::fingerprint;
pub use refresher::{BatchReport, RefreshError, RefreshFailure, RefreshOutcome, Refresher};
pub use store::{IngestReport, MemoryStore, SqliteStore, StoreError, TerminalStore};
