//! # Core Configuration Module
//!
//! Dependency injection and tuning knobs for the sync engine.
//!
//! ## Overview
//!
//! A builder assembles a [`CoreConfig`] holding every bridge the engine needs
//! plus its defaults. Validation is fail-fast: a missing capability is
//! reported with an actionable message at build time instead of surfacing
//! mid-sync.
//!
//! ## Required Dependencies
//!
//! - `LocalStore` - the key-value store being synchronized
//! - at least one remote provider (`DocumentProvider` and/or `TabularProvider`)
//!
//! ## Optional Dependencies
//!
//! - `Transformer` - needed only by configurations that name a transformer
//! - `Clock` - defaults to the system clock
//!
//! When the `desktop-shims` feature is enabled, a SQLite-backed `LocalStore`
//! next to the history database is injected automatically if none is given.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/history.db")
//!     .document_provider(Arc::new(MyFirestoreAdapter::new()))
//!     .default_max_attempts(5)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // No provider of any kind: fails with a CapabilityMissing error
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/history.db")
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, DocumentProvider, LocalStore, SystemClock, TabularProvider, Transformer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Attempts per branch when a configuration has no retry policy.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// First backoff delay when a configuration has no retry policy.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
/// Grace period before terminal progress is cleared.
pub const DEFAULT_PROGRESS_CLEAR_DELAY_MS: u64 = 2_000;
/// History records kept per configuration.
pub const DEFAULT_HISTORY_RETENTION: usize = 100;

const MAX_ATTEMPTS_LIMIT: u32 = 100;
const MAX_INITIAL_DELAY_MS: u64 = 300_000;
const MAX_CLEAR_DELAY_MS: u64 = 60_000;

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding the sync history
    pub database_path: PathBuf,

    /// Local key-value store kept in sync (required)
    pub local_store: Arc<dyn LocalStore>,

    /// Document-database style provider
    pub document_provider: Option<Arc<dyn DocumentProvider>>,

    /// Spreadsheet style provider
    pub tabular_provider: Option<Arc<dyn TabularProvider>>,

    /// Transformer for configurations that declare one
    pub transformer: Option<Arc<dyn Transformer>>,

    /// Time source for progress and history timestamps
    pub clock: Arc<dyn Clock>,

    pub default_max_attempts: u32,
    pub default_initial_delay_ms: u64,

    /// Delay between a terminal status and the progress clear
    pub progress_clear_delay_ms: u64,

    pub event_buffer_size: usize,

    /// History records kept per configuration; 0 keeps everything
    pub history_retention: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("local_store", &"LocalStore { ... }")
            .field(
                "document_provider",
                &self
                    .document_provider
                    .as_ref()
                    .map(|_| "DocumentProvider { ... }"),
            )
            .field(
                "tabular_provider",
                &self
                    .tabular_provider
                    .as_ref()
                    .map(|_| "TabularProvider { ... }"),
            )
            .field(
                "transformer",
                &self.transformer.as_ref().map(|_| "Transformer { ... }"),
            )
            .field("default_max_attempts", &self.default_max_attempts)
            .field("default_initial_delay_ms", &self.default_initial_delay_ms)
            .field("progress_clear_delay_ms", &self.progress_clear_delay_ms)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("history_retention", &self.history_retention)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - At least one remote provider is present
    /// - Retry defaults and delays are within sane bounds
    /// - The event buffer can hold at least one event
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.document_provider.is_none() && self.tabular_provider.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "RemoteProvider".to_string(),
                message: "At least one remote provider is required. \
                         Inject a DocumentProvider and/or a TabularProvider adapter."
                    .to_string(),
            });
        }

        if self.default_max_attempts == 0 {
            return Err(Error::Config(
                "Default max attempts must be at least 1".to_string(),
            ));
        }

        if self.default_max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(Error::Config(format!(
                "Default max attempts exceeds maximum of {}",
                MAX_ATTEMPTS_LIMIT
            )));
        }

        if self.default_initial_delay_ms > MAX_INITIAL_DELAY_MS {
            return Err(Error::Config(
                "Default initial delay exceeds maximum of 5 minutes (300,000ms)".to_string(),
            ));
        }

        if self.progress_clear_delay_ms > MAX_CLEAR_DELAY_MS {
            return Err(Error::Config(
                "Progress clear delay exceeds maximum of 60 seconds (60,000ms)".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn local_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "LocalStore".to_string(),
        message: "LocalStore implementation is required to hold synchronized data. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default SqliteLocalStore. \
                 Other hosts: inject the platform's key-value storage."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_local_store(database_path: &Path) -> Result<Arc<dyn LocalStore>> {
    use bridge_desktop::SqliteLocalStore;
    use core_async::runtime::{self, Handle};
    use std::thread;

    let candidate = database_path
        .parent()
        .map(|parent| parent.join("local_store.db"))
        .unwrap_or_else(|| PathBuf::from("local_store.db"));

    let init_store = |path: PathBuf| -> Result<SqliteLocalStore> {
        runtime::block_on(SqliteLocalStore::new(path)).map_err(|e| {
            Error::Internal(format!("Failed to initialize default LocalStore: {}", e))
        })
    };

    // block_on cannot nest inside a running runtime, so hop to a fresh thread
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(candidate))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default LocalStore".to_string(),
                )
            })??,
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn LocalStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_local_store(_database_path: &Path) -> Result<Arc<dyn LocalStore>> {
    Err(local_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    local_store: Option<Arc<dyn LocalStore>>,
    document_provider: Option<Arc<dyn DocumentProvider>>,
    tabular_provider: Option<Arc<dyn TabularProvider>>,
    transformer: Option<Arc<dyn Transformer>>,
    clock: Option<Arc<dyn Clock>>,
    default_max_attempts: Option<u32>,
    default_initial_delay_ms: Option<u64>,
    progress_clear_delay_ms: Option<u64>,
    event_buffer_size: Option<usize>,
    history_retention: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the history database path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/history.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the local store implementation (required unless `desktop-shims`
    /// provides the default).
    pub fn local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    pub fn document_provider(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.document_provider = Some(provider);
        self
    }

    pub fn tabular_provider(mut self, provider: Arc<dyn TabularProvider>) -> Self {
        self.tabular_provider = Some(provider);
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Attempts per branch for configurations without a retry policy.
    ///
    /// Default: 3
    pub fn default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = Some(attempts);
        self
    }

    /// Initial backoff for configurations without a retry policy.
    ///
    /// Default: 1000 ms
    pub fn default_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.default_initial_delay_ms = Some(delay_ms);
        self
    }

    /// Default: 2000 ms
    pub fn progress_clear_delay_ms(mut self, delay_ms: u64) -> Self {
        self.progress_clear_delay_ms = Some(delay_ms);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Records kept per configuration; 0 disables pruning.
    ///
    /// Default: 100
    pub fn history_retention(mut self, keep: usize) -> Self {
        self.history_retention = Some(keep);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the database path is missing or a value is out
    ///   of bounds
    /// - [`Error::CapabilityMissing`] when no local store or no provider can
    ///   be resolved
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        // Check providers before possibly creating a default store on disk
        if self.document_provider.is_none() && self.tabular_provider.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "RemoteProvider".to_string(),
                message: "At least one remote provider is required. \
                         Inject a DocumentProvider and/or a TabularProvider adapter."
                    .to_string(),
            });
        }

        let local_store = match self.local_store {
            Some(store) => store,
            None => provide_default_local_store(&database_path)?,
        };

        let config = CoreConfig {
            database_path,
            local_store,
            document_provider: self.document_provider,
            tabular_provider: self.tabular_provider,
            transformer: self.transformer,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            default_max_attempts: self.default_max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            default_initial_delay_ms: self
                .default_initial_delay_ms
                .unwrap_or(DEFAULT_INITIAL_DELAY_MS),
            progress_clear_delay_ms: self
                .progress_clear_delay_ms
                .unwrap_or(DEFAULT_PROGRESS_CLEAR_DELAY_MS),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            history_retention: self.history_retention.unwrap_or(DEFAULT_HISTORY_RETENTION),
        };

        config.validate()?;

        Ok(config)
    }
}
