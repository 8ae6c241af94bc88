//! # Sync Orchestration Core
//!
//! Keeps entries of a local key-value store in sync with remote providers.
//!
//! ## Overview
//!
//! A [`SyncConfiguration`] names a storage key, a remote provider kind, a
//! direction and the inputs the provider needs. Executing it:
//! - Fetches remote data into the local store (receive)
//! - Pushes local data to the remote (send)
//! - Does both concurrently for bidirectional configurations
//! - Retries transient failures with a configurable backoff
//! - Publishes live progress and records an audit history entry
//!
//! ## Components
//!
//! - **Progress** (`progress`): Validated run state plus observers that publish it
//! - **Retry** (`retry`): Bounded retry loop returning explicit outcomes
//! - **History** (`history`): Typestate history records and their stores
//! - **Providers** (`providers`): Provider registry and required inputs
//! - **Fetcher / Pusher** (`fetcher`, `pusher`): The two data directions
//! - **Orchestrator** (`orchestrator`): Runs a configuration end to end

pub mod config;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod orchestrator;
pub mod outcome;
pub mod progress;
pub mod providers;
pub mod pusher;
pub mod retry;
mod transform;

pub use config::{
    ConfigProvider, InMemoryConfigProvider, SyncConfiguration, SyncDirection, SyncInput,
    SyncOutput,
};
pub use error::{ErrorKind, Result, SyncError};
pub use fetcher::DataFetcher;
pub use history::{
    HistoryRecord, HistoryStatus, HistoryStore, InMemoryHistoryStore, PendingHistoryRecord,
    RunSummary, SqliteHistoryStore,
};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator, DISABLED_MESSAGE};
pub use outcome::{ReceiveResult, SendResult, SyncRunResult};
pub use progress::{
    DirectionProgress, DirectionStatus, EventBusProgressObserver, NoopProgressObserver,
    ProgressObserver, ProgressSnapshot, ProgressState, ProgressStatus,
};
pub use providers::ProviderRegistry;
pub use pusher::DataPusher;
pub use retry::{execute_with_attempt, BackoffCurve, RetryOutcome, RetryPolicy};
