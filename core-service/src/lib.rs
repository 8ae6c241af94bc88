//! Core service façade and bootstrap helpers.
//!
//! This crate wires a host's [`CoreConfig`] (local store, remote providers,
//! optional transformer, clock) and a [`ConfigProvider`] into a ready to use
//! [`SyncService`]. Desktop apps typically enable the `desktop-shims` feature
//! so a SQLite-backed local store is created when none is injected.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::SyncService;
//!
//! let config = CoreConfig::builder()
//!     .database_path("data/history.db")
//!     .document_provider(documents)
//!     .build()?;
//! let service = SyncService::new(config, configs).await?;
//! let result = service.sync_by_key("profile").await;
//! ```
//!
//! Periodic syncs are owned by the caller through a
//! [`SyncScheduleRegistry`].

pub mod error;
pub mod scheduler;

pub use error::{CoreError, Result};
pub use scheduler::SyncScheduleRegistry;

pub use bridge_traits;
pub use core_runtime;
pub use core_sync;

use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, Receiver};
use core_sync::{
    ConfigProvider, EventBusProgressObserver, HistoryRecord, HistoryStore, OrchestratorConfig,
    ProviderRegistry, SqliteHistoryStore, SyncConfiguration, SyncDirection, SyncOrchestrator,
    SyncRunResult,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Primary façade exposed to host applications.
pub struct SyncService {
    orchestrator: SyncOrchestrator,
    configs: Arc<dyn ConfigProvider>,
    history: Arc<dyn HistoryStore>,
    events: EventBus,
}

impl SyncService {
    /// Validate `config`, open the history database at its
    /// `database_path` and build the service.
    pub async fn new(config: CoreConfig, configs: Arc<dyn ConfigProvider>) -> Result<Self> {
        config.validate()?;
        let history = SqliteHistoryStore::open(&config.database_path)
            .await
            .map_err(|e| {
                CoreError::InitializationFailed(format!(
                    "Failed to open history database {}: {}",
                    config.database_path.display(),
                    e
                ))
            })?;
        Self::with_history_store(config, configs, Arc::new(history))
    }

    /// Build the service around an already opened history store.
    pub fn with_history_store(
        config: CoreConfig,
        configs: Arc<dyn ConfigProvider>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self> {
        config.validate()?;

        let mut providers = ProviderRegistry::new();
        if let Some(documents) = &config.document_provider {
            providers = providers.with_document(Arc::clone(documents));
        }
        if let Some(tabular) = &config.tabular_provider {
            providers = providers.with_tabular(Arc::clone(tabular));
        }
        let kinds: Vec<String> = providers
            .registered_kinds()
            .iter()
            .map(ToString::to_string)
            .collect();

        let events = EventBus::new(config.event_buffer_size);
        let mut orchestrator = SyncOrchestrator::new(
            providers,
            Arc::clone(&config.local_store),
            Arc::clone(&history),
            OrchestratorConfig::from(&config),
        )
        .with_observer(Arc::new(EventBusProgressObserver::new(events.clone())))
        .with_clock(Arc::clone(&config.clock))
        .with_event_bus(events.clone());
        if let Some(transformer) = &config.transformer {
            orchestrator = orchestrator.with_transformer(Arc::clone(transformer));
        }

        info!(
            providers = ?kinds,
            history_retention = config.history_retention,
            "Sync service initialized"
        );

        Ok(Self {
            orchestrator,
            configs,
            history,
            events,
        })
    }

    /// Run a configuration the caller already holds.
    pub async fn execute(&self, config: &SyncConfiguration) -> SyncRunResult {
        self.orchestrator.execute(config).await
    }

    /// Look up the configuration for `key` and run it.
    ///
    /// A missing configuration yields a failed result without a history
    /// record, since there is no configuration to attribute it to.
    #[instrument(skip(self))]
    pub async fn sync_by_key(&self, key: &str) -> SyncRunResult {
        match self.configs.load_by_key(key).await {
            Ok(Some(config)) => self.orchestrator.execute(&config).await,
            Ok(None) => {
                warn!("No sync configuration for key");
                SyncRunResult::failure(
                    SyncDirection::Bidirectional,
                    CoreError::ConfigNotFound(key.to_string()).to_string(),
                )
            }
            Err(e) => {
                warn!("Failed to load sync configuration: {}", e);
                SyncRunResult::failure(
                    SyncDirection::Bidirectional,
                    format!("Failed to load sync configuration: {}", e),
                )
            }
        }
    }

    /// Most recent history records of a configuration.
    pub async fn history(&self, config_id: &str, limit: u32) -> Result<Vec<HistoryRecord>> {
        Ok(self.history.list_by_config(config_id, limit).await?)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Events concerning a single configuration.
    pub fn subscribe_config(&self, config_id: impl Into<String>) -> EventStream {
        EventStream::new(self.events.subscribe()).for_config(config_id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn config_provider(&self) -> Arc<dyn ConfigProvider> {
        Arc::clone(&self.configs)
    }
}
