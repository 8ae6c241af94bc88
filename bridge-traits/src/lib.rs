//! # Host Bridge Traits
//!
//! Contracts for the collaborators the sync engine consumes but does not own.
//!
//! ## Overview
//!
//! The orchestration core never talks to a remote system or a storage engine
//! directly. Every external capability is expressed as a trait here and
//! injected by the host (desktop shims, tests, or a platform adapter).
//!
//! ## Traits
//!
//! ### Remote providers
//! - [`DocumentProvider`](provider::DocumentProvider) - Document-database style remote (query by id, create record)
//! - [`TabularProvider`](provider::TabularProvider) - Spreadsheet style remote (get range, write range)
//!
//! ### Local data
//! - [`LocalStore`](storage::LocalStore) - Key-value store kept in sync with the remotes
//! - [`Transformer`](transform::Transformer) - Optional reshaping step between remote and local data
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! use core_runtime::error::Error;
//!
//! let local_store = builder.local_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "LocalStore".to_string(),
//!         message: "No local store provided. \
//!                  Desktop: enable the desktop-shims feature. \
//!                  Other hosts: inject a platform adapter.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should
//! convert their native failures into `OperationFailed` with an actionable
//! message; the sync engine treats those as transient and retries them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so implementations can be shared
//! across the concurrent branches of a bidirectional run.

pub mod error;
pub mod provider;
pub mod storage;
pub mod time;
pub mod transform;

pub use error::BridgeError;

// Re-export commonly used types
pub use provider::{DocumentProvider, ProviderInputs, ProviderKind, TabularProvider};
pub use storage::{LocalStore, StoreEntries};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
pub use transform::{TransformOutcome, TransformSpec, Transformer};
