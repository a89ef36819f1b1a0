//! Refresh orchestration against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use terminal_capability::{
    Attempt, AttemptResult, Cvm, DeviceStatus, PaymentMethod, Terminal, TriState,
};
use terminal_refresh::{
    IngestReport, MemoryStore, RefreshConfig, RefreshError, Refresher, StoreError, TerminalStore,
};

async fn seeded_store(ids: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for id in ids {
        store.insert_terminal(&Terminal::new(*id)).await.unwrap();
    }
    store
}

/// Delegates to a memory store but fails every read of one terminal.
struct FlakyStore {
    inner: MemoryStore,
    broken: String,
}

#[async_trait]
impl TerminalStore for FlakyStore {
    async fn get_terminal(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError> {
        self.inner.get_terminal(terminal_id).await
    }

    async fn list_attempts(&self, terminal_id: &str) -> Result<Vec<Attempt>, StoreError> {
        if terminal_id == self.broken {
            return Err(StoreError::Backend("disk on fire".to_string()));
        }
        self.inner.list_attempts(terminal_id).await
    }

    async fn update_terminal(
        &self,
        terminal: &Terminal,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.inner.update_terminal(terminal, expected_version).await
    }

    async fn list_terminal_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_terminal_ids().await
    }

    async fn insert_terminal(&self, terminal: &Terminal) -> Result<(), StoreError> {
        self.inner.insert_terminal(terminal).await
    }

    async fn append_attempt(&self, attempt: Attempt) -> Result<Attempt, StoreError> {
        self.inner.append_attempt(attempt).await
    }

    async fn ingest_attempts(&self, attempts: Vec<Attempt>) -> Result<IngestReport, StoreError> {
        self.inner.ingest_attempts(attempts).await
    }
}

#[tokio::test]
async fn test_refresh_writes_derived_state_and_provenance() {
    let store = seeded_store(&["t-1"]).await;
    store
        .append_attempt(Attempt::success("t-1").with_payment_method(PaymentMethod::Tap))
        .await
        .unwrap();
    store
        .append_attempt(
            Attempt::success("t-1")
                .with_cvm(Cvm::Pin)
                .with_card_network("visa"),
        )
        .await
        .unwrap();

    let refresher = Refresher::new(store.clone());
    let before = Utc::now();
    let outcome = refresher.refresh_terminal("t-1", "admin-7").await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.attempt_count, 2);
    assert_eq!(outcome.version, 1);

    let stored = store.get_terminal("t-1").await.unwrap().unwrap();
    assert_eq!(stored.capabilities.contactless, Some(true));
    assert!(stored.capabilities.card_networks.contains("visa"));
    assert_eq!(stored.verification.pin.overall, TriState::Supported);
    assert_eq!(stored.provenance, outcome.provenance);
    assert!(stored.provenance.has_been_refreshed);
    assert_eq!(stored.provenance.refreshed_by.as_deref(), Some("admin-7"));
    assert_eq!(stored.provenance.refreshed_attempt_count, 2);
    assert!(stored.provenance.refreshed_at.unwrap() >= before);
}

#[tokio::test]
async fn test_second_refresh_is_unchanged() {
    let store = seeded_store(&["t-1"]).await;
    store
        .append_attempt(
            Attempt::conclusive_failure("t-1").with_payment_method(PaymentMethod::ApplePay),
        )
        .await
        .unwrap();

    let refresher = Refresher::new(store.clone());
    let first = refresher.refresh_terminal("t-1", "system").await.unwrap();
    let second = refresher.refresh_terminal("t-1", "system").await.unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.snapshot, second.snapshot);
    assert_eq!(second.version, 2);
}

#[tokio::test]
async fn test_refresh_with_no_attempts_still_stamps() {
    let store = seeded_store(&["t-1"]).await;
    let refresher = Refresher::new(store.clone());

    let outcome = refresher.refresh_terminal("t-1", "system").await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(outcome.attempt_count, 0);

    let stored = store.get_terminal("t-1").await.unwrap().unwrap();
    assert!(stored.provenance.has_been_refreshed);
    assert_eq!(stored.provenance.refreshed_attempt_count, 0);
    assert_eq!(stored.capabilities.contactless, None);
    assert_eq!(stored.verification.signature.overall, TriState::Unknown);
}

#[tokio::test]
async fn test_refresh_preserves_flags_without_new_evidence() {
    let store = seeded_store(&[]).await;
    let mut terminal = Terminal::new("t-1");
    terminal.capabilities.google_pay = Some(true);
    store.insert_terminal(&terminal).await.unwrap();

    let refresher = Refresher::new(store.clone());
    refresher.refresh_terminal("t-1", "system").await.unwrap();

    let stored = store.get_terminal("t-1").await.unwrap().unwrap();
    assert_eq!(stored.capabilities.google_pay, Some(true));
}

#[tokio::test]
async fn test_low_success_rate_demotes_once() {
    let store = seeded_store(&["t-1"]).await;
    store.append_attempt(Attempt::success("t-1")).await.unwrap();
    for _ in 0..4 {
        store
            .append_attempt(Attempt::new("t-1", AttemptResult::Failure))
            .await
            .unwrap();
    }

    let refresher = Refresher::new(store.clone());
    let first = refresher.refresh_terminal("t-1", "system").await.unwrap();
    assert!(first.demoted);
    assert_eq!(first.snapshot.status, DeviceStatus::Inactive);
    assert_eq!(first.snapshot.success_rate.total_attempts, 5);
    assert_eq!(first.snapshot.success_rate.successful_attempts, 1);

    let second = refresher.refresh_terminal("t-1", "system").await.unwrap();
    assert!(!second.demoted);
    assert_eq!(second.snapshot.status, DeviceStatus::Inactive);
}

#[tokio::test]
async fn test_reported_status_is_respected_over_success_rate() {
    let store = seeded_store(&["t-1"]).await;
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    for i in 0..5 {
        store
            .append_attempt(
                Attempt::new("t-1", AttemptResult::Failure)
                    .observed_at(base + Duration::minutes(i)),
            )
            .await
            .unwrap();
    }
    store
        .append_attempt(
            Attempt::new("t-1", AttemptResult::Unknown)
                .with_device_status(DeviceStatus::Maintenance)
                .observed_at(base + Duration::hours(1)),
        )
        .await
        .unwrap();

    let refresher = Refresher::new(store.clone());
    let outcome = refresher.refresh_terminal("t-1", "system").await.unwrap();

    assert_eq!(outcome.snapshot.status, DeviceStatus::Maintenance);
    assert!(!outcome.demoted);
}

#[tokio::test]
async fn test_disabled_success_rate_policy_never_demotes() {
    let store = seeded_store(&["t-1"]).await;
    for _ in 0..10 {
        store
            .append_attempt(Attempt::new("t-1", AttemptResult::Failure))
            .await
            .unwrap();
    }

    let mut config = RefreshConfig::default();
    config.success_rate.enabled = false;
    let refresher = Refresher::with_config(store.clone(), config);

    let outcome = refresher.refresh_terminal("t-1", "system").await.unwrap();
    assert!(!outcome.demoted);
    assert_eq!(outcome.snapshot.status, DeviceStatus::Active);
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let inner = MemoryStore::new();
    for id in ["t-1", "t-2", "t-3"] {
        inner.insert_terminal(&Terminal::new(id)).await.unwrap();
        inner
            .append_attempt(Attempt::success(id).with_payment_method(PaymentMethod::Tap))
            .await
            .unwrap();
    }
    let store = Arc::new(FlakyStore {
        inner,
        broken: "t-2".to_string(),
    });

    let refresher = Refresher::new(store.clone());
    let ids: Vec<String> = ["t-1", "t-2", "t-3", "t-missing"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = refresher.refresh_batch(&ids, "sweeper").await;

    assert!(!report.is_clean());
    let refreshed: Vec<&str> = report.outcomes.iter().map(|o| o.terminal_id.as_str()).collect();
    assert_eq!(refreshed, vec!["t-1", "t-3"]);
    let failed: Vec<&str> = report.failures.iter().map(|f| f.terminal_id.as_str()).collect();
    assert_eq!(failed, vec!["t-2", "t-missing"]);
    assert!(report.failures[0].error.contains("disk on fire"));
    assert_eq!(report.changed, 2);

    // Failed terminal left untouched
    let broken = store.get_terminal("t-2").await.unwrap().unwrap();
    assert!(!broken.provenance.has_been_refreshed);
    assert_eq!(broken.version, 0);
}

#[tokio::test]
async fn test_refresh_all_counts_demotions() {
    let store = seeded_store(&["good", "bad"]).await;
    for _ in 0..5 {
        store.append_attempt(Attempt::success("good")).await.unwrap();
        store
            .append_attempt(Attempt::new("bad", AttemptResult::Failure))
            .await
            .unwrap();
    }

    let mut config = RefreshConfig::default();
    config.batch.max_concurrent = 1;
    let refresher = Refresher::with_config(store.clone(), config);
    let report = refresher.refresh_all("nightly").await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.demoted, 1);
    assert_eq!(
        store.get_terminal("bad").await.unwrap().unwrap().status,
        DeviceStatus::Inactive
    );
    assert_eq!(
        store.get_terminal("good").await.unwrap().unwrap().status,
        DeviceStatus::Active
    );
}

#[tokio::test]
async fn test_optimistic_refresh_rejects_stale_write() {
    /// Bumps the stored version between the read and the write.
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl TerminalStore for RacingStore {
        async fn get_terminal(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError> {
            self.inner.get_terminal(terminal_id).await
        }

        async fn list_attempts(&self, terminal_id: &str) -> Result<Vec<Attempt>, StoreError> {
            if let Some(current) = self.inner.get_terminal(terminal_id).await? {
                self.inner.update_terminal(&current, None).await?;
            }
            self.inner.list_attempts(terminal_id).await
        }

        async fn update_terminal(
            &self,
            terminal: &Terminal,
            expected_version: Option<u64>,
        ) -> Result<u64, StoreError> {
            self.inner.update_terminal(terminal, expected_version).await
        }

        async fn list_terminal_ids(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_terminal_ids().await
        }

        async fn insert_terminal(&self, terminal: &Terminal) -> Result<(), StoreError> {
            self.inner.insert_terminal(terminal).await
        }

        async fn append_attempt(&self, attempt: Attempt) -> Result<Attempt, StoreError> {
            self.inner.append_attempt(attempt).await
        }

        async fn ingest_attempts(
            &self,
            attempts: Vec<Attempt>,
        ) -> Result<IngestReport, StoreError> {
            self.inner.ingest_attempts(attempts).await
        }
    }

    let inner = MemoryStore::new();
    inner.insert_terminal(&Terminal::new("t-1")).await.unwrap();
    let store = Arc::new(RacingStore { inner });

    let mut config = RefreshConfig::default();
    config.consistency.optimistic = true;
    let optimistic = Refresher::with_config(store.clone(), config);

    let result = optimistic.refresh_terminal("t-1", "system").await;
    assert!(matches!(
        result,
        Err(RefreshError::Store(StoreError::Conflict { expected: 0, actual: 1, .. }))
    ));

    // Last-writer-wins mode overwrites regardless
    let lww = Refresher::new(store.clone());
    let outcome = lww.refresh_terminal("t-1", "system").await.unwrap();
    assert_eq!(outcome.version, 3);
}
