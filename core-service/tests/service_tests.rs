//! Integration tests for the service façade and the schedule registry.

use async_trait::async_trait;
use bridge_desktop::MemoryLocalStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{BridgeError, DocumentProvider, ProviderInputs};
use core_async::time::{sleep, Duration};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, ScheduleEvent, SyncEvent};
use core_service::{CoreError, SyncScheduleRegistry, SyncService};
use core_sync::{
    ConfigProvider, HistoryStatus, InMemoryConfigProvider, InMemoryHistoryStore, SyncConfiguration,
    SyncDirection, SyncError,
};
use mockall::mock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Serves a single fixed document and counts lookups.
#[derive(Default)]
struct FixedDocument {
    queries: AtomicU32,
}

#[async_trait]
impl DocumentProvider for FixedDocument {
    async fn connect(&self, _inputs: &ProviderInputs) -> BridgeResult<()> {
        Ok(())
    }

    async fn query_by_id(
        &self,
        _collection: &str,
        document_id: &str,
    ) -> BridgeResult<Option<Value>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if document_id == "broken" {
            return Err(BridgeError::OperationFailed("document unavailable".into()));
        }
        Ok(Some(json!({ "theme": "dark" })))
    }

    async fn create_record(&self, _collection: &str, _record: Value) -> BridgeResult<String> {
        Ok("new-id".to_string())
    }
}

mock! {
    pub Configs {}

    #[async_trait]
    impl ConfigProvider for Configs {
        async fn load_by_key(&self, key: &str) -> core_sync::Result<Option<SyncConfiguration>>;
    }
}

fn settings_config(document_id: &str) -> SyncConfiguration {
    SyncConfiguration::new("cfg-settings", "settings", "firestore", SyncDirection::ReceiveOnly)
        .with_input("collection", "prefs")
        .with_input("document_id", document_id)
        .with_output("theme", json!("light"))
}

fn core_config(
    documents: Arc<FixedDocument>,
    store: Arc<MemoryLocalStore>,
) -> anyhow::Result<CoreConfig> {
    Ok(CoreConfig::builder()
        .database_path("unused/history.db")
        .local_store(store)
        .document_provider(documents)
        .default_max_attempts(2)
        .default_initial_delay_ms(1)
        .progress_clear_delay_ms(10)
        .build()?)
}

struct Fixture {
    service: Arc<SyncService>,
    documents: Arc<FixedDocument>,
    store: Arc<MemoryLocalStore>,
    history: Arc<InMemoryHistoryStore>,
}

fn fixture(configs: Arc<dyn ConfigProvider>) -> anyhow::Result<Fixture> {
    let documents = Arc::new(FixedDocument::default());
    let store = Arc::new(MemoryLocalStore::new());
    let history = Arc::new(InMemoryHistoryStore::new());
    let service = SyncService::with_history_store(
        core_config(Arc::clone(&documents), Arc::clone(&store))?,
        configs,
        Arc::clone(&history) as _,
    )?;
    Ok(Fixture {
        service: Arc::new(service),
        documents,
        store,
        history,
    })
}

fn in_memory_configs(configs: Vec<SyncConfiguration>) -> Arc<dyn ConfigProvider> {
    Arc::new(InMemoryConfigProvider::with_configs(configs))
}

// ============================================================================
// SyncService
// ============================================================================

#[core_async::test]
async fn test_sync_by_key_runs_the_stored_configuration() -> anyhow::Result<()> {
    let f = fixture(in_memory_configs(vec![settings_config("user-1")]))?;

    let result = f.service.sync_by_key("settings").await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(f.store.snapshot().await["theme"], json!("dark"));
    let history = f.service.history("cfg-settings", 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Success);
    Ok(())
}

#[core_async::test]
async fn test_sync_by_unknown_key_is_failed_result_without_history() -> anyhow::Result<()> {
    let f = fixture(in_memory_configs(Vec::new()))?;

    let result = f.service.sync_by_key("missing").await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Sync configuration not found: missing")
    );
    assert!(f.history.records().await.is_empty());
    assert_eq!(f.documents.queries.load(Ordering::SeqCst), 0);
    Ok(())
}

#[core_async::test]
async fn test_config_lookup_failure_is_reported() -> anyhow::Result<()> {
    let mut configs = MockConfigs::new();
    configs
        .expect_load_by_key()
        .returning(|_| Err(SyncError::Database("config table locked".into())));
    let f = fixture(Arc::new(configs))?;

    let result = f.service.sync_by_key("settings").await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("config table locked"));
    assert!(f.history.records().await.is_empty());
    Ok(())
}

#[core_async::test]
async fn test_execute_uses_core_retry_defaults() -> anyhow::Result<()> {
    let f = fixture(in_memory_configs(Vec::new()))?;

    let result = f.service.execute(&settings_config("broken")).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("document unavailable"));
    // default_max_attempts(2)
    assert_eq!(f.documents.queries.load(Ordering::SeqCst), 2);
    assert_eq!(f.history.records().await[0].retry_count, 1);
    Ok(())
}

#[core_async::test]
async fn test_subscribers_see_run_and_clear_events() -> anyhow::Result<()> {
    let f = fixture(in_memory_configs(vec![settings_config("user-1")]))?;
    let mut events = f.service.subscribe_config("cfg-settings");

    f.service.sync_by_key("settings").await;
    sleep(Duration::from_millis(50)).await;

    let mut seen = Vec::new();
    while let Some(Ok(event)) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(
        seen.first(),
        Some(CoreEvent::Sync(SyncEvent::Started { .. }))
    ));
    assert!(seen
        .iter()
        .any(|e| matches!(e, CoreEvent::Sync(SyncEvent::Completed { .. }))));
    assert!(matches!(
        seen.last(),
        Some(CoreEvent::Sync(SyncEvent::Cleared { .. }))
    ));
    Ok(())
}

#[core_async::test]
async fn test_new_opens_sqlite_history() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("kvsync-service-{}", uuid::Uuid::new_v4()));
    let documents = Arc::new(FixedDocument::default());
    let config = CoreConfig::builder()
        .database_path(dir.join("history.db"))
        .local_store(Arc::new(MemoryLocalStore::new()))
        .document_provider(documents)
        .default_initial_delay_ms(1)
        .build()?;

    let configs = in_memory_configs(vec![settings_config("user-1")]);
    let service = SyncService::new(config, configs).await?;
    service.sync_by_key("settings").await;
    service.sync_by_key("settings").await;

    let history = service.history("cfg-settings", 1).await?;
    assert_eq!(history.len(), 1);
    assert!(dir.join("history.db").exists());

    drop(service);
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

// ============================================================================
// SyncScheduleRegistry
// ============================================================================

#[tokio::test]
async fn test_scheduled_key_syncs_periodically() -> anyhow::Result<()> {
    let f = fixture(in_memory_configs(vec![settings_config("user-1")]))?;
    let registry = SyncScheduleRegistry::new(Arc::clone(&f.service));

    registry.schedule("settings", Duration::from_millis(20)).await?;
    assert!(registry.is_scheduled("settings"));
    assert_eq!(registry.interval_of("settings"), Some(Duration::from_millis(20)));

    sleep(Duration::from_millis(110)).await;
    let runs = f.history.records().await.len();
    assert!(runs >= 2, "expected at least two runs, got {}", runs);

    assert!(registry.unschedule("settings"));
    assert!(!registry.is_scheduled("settings"));
    sleep(Duration::from_millis(30)).await;
    let after_stop = f.history.records().await.len();
    sleep(Duration::from_millis(60)).await;
    assert_eq!(f.history.records().await.len(), after_stop);
    Ok(())
}

#[tokio::test]
async fn test_schedule_rejects_unknown_key_and_zero_interval() -> anyhow::Result<()> {
    let f = fixture(in_memory_configs(vec![settings_config("user-1")]))?;
    let registry = SyncScheduleRegistry::new(Arc::clone(&f.service));

    let err = registry
        .schedule("missing", Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigNotFound(key) if key == "missing"));

    let err = registry.schedule("settings", Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidSchedule(_)));

    assert!(registry.scheduled_keys().is_empty());
    assert!(!registry.unschedule("settings"));
    Ok(())
}

#[tokio::test]
async fn test_registry_events_and_shutdown() -> anyhow::Result<()> {
    let mut second = settings_config("user-2");
    second.id = "cfg-other".to_string();
    second.storage_key = "other".to_string();
    let f = fixture(in_memory_configs(vec![settings_config("user-1"), second]))?;
    let registry = SyncScheduleRegistry::new(Arc::clone(&f.service));
    let mut rx = f.service.subscribe();

    registry.schedule("settings", Duration::from_secs(3600)).await?;
    registry.schedule("other", Duration::from_secs(3600)).await?;
    // Rescheduling replaces the entry.
    registry.schedule("other", Duration::from_secs(60)).await?;
    assert_eq!(registry.scheduled_keys(), vec!["other", "settings"]);
    assert_eq!(registry.interval_of("other"), Some(Duration::from_secs(60)));

    registry.shutdown();
    assert!(registry.scheduled_keys().is_empty());

    let mut scheduled = 0;
    let mut unscheduled = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            CoreEvent::Schedule(ScheduleEvent::Scheduled { .. }) => scheduled += 1,
            CoreEvent::Schedule(ScheduleEvent::Unscheduled { .. }) => unscheduled += 1,
            _ => {}
        }
    }
    assert_eq!(scheduled, 3);
    assert_eq!(unscheduled, 2);
    Ok(())
}

#[test]
fn test_missing_provider_fails_initialization() {
    let result = CoreConfig::builder()
        .database_path("unused/history.db")
        .local_store(Arc::new(MemoryLocalStore::new()))
        .build();

    let err: CoreError = result.err().expect("build should fail").into();
    assert!(matches!(err, CoreError::Runtime(_)));
    assert!(err.to_string().contains("RemoteProvider"));
}
