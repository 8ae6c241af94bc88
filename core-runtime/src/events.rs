//! # Event Bus System
//!
//! Event-driven notification for the sync engine, built on
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies per domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Progress observers publish [`SyncEvent`]s so a UI can render live run
//! state; the orchestrator publishes [`HistoryEvent`]s once an audit record is
//! stored; the schedule registry publishes [`ScheduleEvent`]s.
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Orchestrator ├────────────>│           │    subscribe   ┌────────────┐
//! └──────────────┘             │ EventBus  ├───────────────>│ UI / host  │
//! ┌──────────────┐    emit     │ (broadcast│                └────────────┘
//! │  Scheduler   ├────────────>│  channel) │
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Cleared {
//!         config_id: "cfg-1".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n`
//!   events. Non-fatal; keep receiving.
//! - **`RecvError::Closed`**: all senders were dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error; publishers in this
//! workspace ignore it because progress is best-effort.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Live progress of a sync run
    Sync(SyncEvent),
    /// Audit trail updates
    History(HistoryEvent),
    /// Periodic schedule changes
    Schedule(ScheduleEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::History(e) => e.description(),
            CoreEvent::Schedule(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::History(HistoryEvent::Recorded { status, .. }) if status == "failed" => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::History(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Config id the event refers to, when there is one.
    pub fn config_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(e) => Some(e.config_id()),
            CoreEvent::History(HistoryEvent::Recorded { config_id, .. }) => Some(config_id),
            CoreEvent::Schedule(_) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Live progress of one sync run, mirroring the progress observer calls.
///
/// Status strings use the snake_case names of the progress status enums
/// (`starting`, `receiving`, `in_progress`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A run was initialized.
    Started {
        config_id: String,
        storage_key: String,
        total_steps: u32,
    },
    /// Overall run status changed.
    StatusChanged {
        config_id: String,
        status: String,
        progress: u8,
    },
    /// A step of the run finished and the next one began.
    StepChanged {
        config_id: String,
        /// Human-readable label of the step now running
        step: String,
        completed_steps: u32,
        total_steps: u32,
        progress: u8,
    },
    /// Receive or send branch progress.
    DirectionProgress {
        config_id: String,
        /// `receive` or `send`
        direction: String,
        status: String,
        current_step: u32,
        total_steps: u32,
        error: Option<String>,
    },
    /// The run completed successfully.
    Completed {
        config_id: String,
        storage_key: String,
        duration_ms: u64,
    },
    /// The run failed (fully or partially).
    Failed {
        config_id: String,
        storage_key: String,
        message: String,
    },
    /// Terminal progress was discarded after the grace delay.
    Cleared { config_id: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::StatusChanged { .. } => "Sync status changed",
            SyncEvent::StepChanged { .. } => "Sync step changed",
            SyncEvent::DirectionProgress { .. } => "Sync direction progress",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cleared { .. } => "Sync progress cleared",
        }
    }

    pub fn config_id(&self) -> &str {
        match self {
            SyncEvent::Started { config_id, .. }
            | SyncEvent::StatusChanged { config_id, .. }
            | SyncEvent::StepChanged { config_id, .. }
            | SyncEvent::DirectionProgress { config_id, .. }
            | SyncEvent::Completed { config_id, .. }
            | SyncEvent::Failed { config_id, .. }
            | SyncEvent::Cleared { config_id } => config_id,
        }
    }
}

// ============================================================================
// History Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum HistoryEvent {
    /// An audit record was appended to the history store.
    Recorded {
        record_id: String,
        config_id: String,
        /// `success`, `partial` or `failed`
        status: String,
        retry_count: u32,
    },
}

impl HistoryEvent {
    fn description(&self) -> &str {
        match self {
            HistoryEvent::Recorded { .. } => "Sync history recorded",
        }
    }
}

// ============================================================================
// Schedule Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ScheduleEvent {
    /// A periodic sync was registered (or re-registered) for a storage key.
    Scheduled { storage_key: String, interval_ms: u64 },
    /// A periodic sync was removed.
    Unscheduled { storage_key: String },
}

impl ScheduleEvent {
    fn description(&self) -> &str {
        match self {
            ScheduleEvent::Scheduled { .. } => "Periodic sync scheduled",
            ScheduleEvent::Unscheduled { .. } => "Periodic sync unscheduled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus yields another handle onto the same channel. Each
/// `subscribe()` creates an independent receiver; past events are not
/// replayed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let stream = EventStream::new(event_bus.subscribe())
///     .for_config("cfg-1")
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filters: Vec<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filters: Vec::new(),
        }
    }

    /// Adds a filter; only events matching every filter are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Only keep events about the given sync configuration.
    pub fn for_config(self, config_id: impl Into<String>) -> Self {
        let config_id = config_id.into();
        self.filter(move |event| event.config_id() == Some(config_id.as_str()))
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filters.iter().all(|filter| filter(event))
    }

    /// Receives the next event that passes the filters.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n`
    /// events and `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filters", &self.filters.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
