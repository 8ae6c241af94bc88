//! Live progress of a single sync run.
//!
//! A [`ProgressState`] is created at the start of every `execute()`, mutated
//! by the orchestrator as the run advances and pushed to a
//! [`ProgressObserver`] after each change. It is never persisted.
//!
//! Every mutation is validated as a whole: the candidate state is checked
//! before it replaces the current one, so a rejected change leaves the state
//! untouched.

use async_trait::async_trait;
use core_async::time::now_millis;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

use crate::error::{Result, SyncError};

// ============================================================================
// Status enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Idle,
    Starting,
    Receiving,
    Sending,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Receiving => "receiving",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Receiving | Self::Sending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for ProgressStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "starting" => Ok(Self::Starting),
            "receiving" => Ok(Self::Receiving),
            "sending" => Ok(Self::Sending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one direction (receive or send) within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DirectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DirectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionProgress {
    pub status: DirectionStatus,
    pub current_step: u32,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DirectionProgress {
    pub fn pending(total_steps: u32) -> Self {
        Self {
            status: DirectionStatus::Pending,
            current_step: 0,
            total_steps,
            error: None,
        }
    }

    pub fn in_progress(total_steps: u32) -> Self {
        Self {
            status: DirectionStatus::InProgress,
            ..Self::pending(total_steps)
        }
    }

    pub fn completed(total_steps: u32) -> Self {
        Self {
            status: DirectionStatus::Completed,
            current_step: total_steps,
            total_steps,
            error: None,
        }
    }

    pub fn failed(total_steps: u32, error: impl Into<String>) -> Self {
        Self {
            status: DirectionStatus::Failed,
            current_step: 0,
            total_steps,
            error: Some(error.into()),
        }
    }

    fn validate(&self, direction: &str) -> Result<()> {
        if self.current_step > self.total_steps {
            return Err(SyncError::Validation(format!(
                "{} progress current step {} exceeds total steps {}",
                direction, self.current_step, self.total_steps
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ProgressState
// ============================================================================

/// Serializable form of a [`ProgressState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub config_id: String,
    pub storage_key: String,
    pub status: ProgressStatus,
    pub progress: u8,
    pub current_step: String,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub start_time: i64,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub receive_progress: Option<DirectionProgress>,
    #[serde(default)]
    pub send_progress: Option<DirectionProgress>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    config_id: String,
    storage_key: String,
    status: ProgressStatus,
    progress: u8,
    current_step: String,
    total_steps: u32,
    completed_steps: u32,
    start_time: i64,
    end_time: Option<i64>,
    error: Option<String>,
    receive_progress: Option<DirectionProgress>,
    send_progress: Option<DirectionProgress>,
}

impl ProgressState {
    /// New run state in `starting` with zero progress, stamped with the
    /// current time.
    pub fn create(
        config_id: impl Into<String>,
        storage_key: impl Into<String>,
        total_steps: u32,
    ) -> Self {
        Self::create_at(config_id, storage_key, total_steps, now_millis() as i64)
    }

    pub fn create_at(
        config_id: impl Into<String>,
        storage_key: impl Into<String>,
        total_steps: u32,
        start_time: i64,
    ) -> Self {
        Self {
            config_id: config_id.into(),
            storage_key: storage_key.into(),
            status: ProgressStatus::Starting,
            progress: 0,
            current_step: "Starting sync".to_string(),
            total_steps,
            completed_steps: 0,
            start_time,
            end_time: None,
            error: None,
            receive_progress: None,
            send_progress: None,
        }
    }

    pub fn config_id(&self) -> &str {
        &self.config_id
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn status(&self) -> ProgressStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn completed_steps(&self) -> u32 {
        self.completed_steps
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> Option<i64> {
        self.end_time
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn receive_progress(&self) -> Option<&DirectionProgress> {
        self.receive_progress.as_ref()
    }

    pub fn send_progress(&self) -> Option<&DirectionProgress> {
        self.send_progress.as_ref()
    }

    pub fn set_status(&mut self, status: ProgressStatus) -> Result<()> {
        self.apply(|state| state.status = status)
    }

    pub fn set_current_step(&mut self, step: impl Into<String>) -> Result<()> {
        let step = step.into();
        self.apply(|state| state.current_step = step)
    }

    pub fn increment_completed_steps(&mut self) -> Result<()> {
        self.apply(|state| state.completed_steps = state.completed_steps.saturating_add(1))
    }

    pub fn set_receive_progress(&mut self, progress: DirectionProgress) -> Result<()> {
        self.apply(|state| state.receive_progress = Some(progress))
    }

    pub fn set_send_progress(&mut self, progress: DirectionProgress) -> Result<()> {
        self.apply(|state| state.send_progress = Some(progress))
    }

    pub fn complete(&mut self) {
        self.complete_at(now_millis() as i64)
    }

    /// Mark the run completed. The end time never precedes the start time.
    pub fn complete_at(&mut self, now: i64) {
        self.status = ProgressStatus::Completed;
        self.progress = 100;
        self.end_time = Some(now.max(self.start_time));
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.fail_at(reason, now_millis() as i64)
    }

    /// Mark the run failed; progress stays where it was.
    pub fn fail_at(&mut self, reason: impl Into<String>, now: i64) {
        self.status = ProgressStatus::Failed;
        self.error = Some(reason.into());
        self.end_time = Some(now.max(self.start_time));
    }

    /// Milliseconds since start, up to the end time once the run finished.
    pub fn elapsed_time(&self) -> u64 {
        self.elapsed_time_at(now_millis() as i64)
    }

    pub fn elapsed_time_at(&self, now: i64) -> u64 {
        let end = self.end_time.unwrap_or(now);
        end.saturating_sub(self.start_time).max(0) as u64
    }

    pub fn is_in_progress(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn to_snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            config_id: self.config_id.clone(),
            storage_key: self.storage_key.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            total_steps: self.total_steps,
            completed_steps: self.completed_steps,
            start_time: self.start_time,
            end_time: self.end_time,
            error: self.error.clone(),
            receive_progress: self.receive_progress.clone(),
            send_progress: self.send_progress.clone(),
        }
    }

    /// Rebuild a state from a snapshot, rejecting snapshots that break the
    /// state's invariants.
    pub fn from_snapshot(snapshot: ProgressSnapshot) -> Result<Self> {
        let state = Self {
            config_id: snapshot.config_id,
            storage_key: snapshot.storage_key,
            status: snapshot.status,
            progress: snapshot.progress,
            current_step: snapshot.current_step,
            total_steps: snapshot.total_steps,
            completed_steps: snapshot.completed_steps,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            error: snapshot.error,
            receive_progress: snapshot.receive_progress,
            send_progress: snapshot.send_progress,
        };
        state.validate()?;
        Ok(state)
    }

    fn apply(&mut self, change: impl FnOnce(&mut Self)) -> Result<()> {
        let mut next = self.clone();
        change(&mut next);
        next.recompute_progress();
        next.validate()?;
        *self = next;
        Ok(())
    }

    fn recompute_progress(&mut self) {
        self.progress = match self.status {
            ProgressStatus::Idle => 0,
            ProgressStatus::Completed => 100,
            ProgressStatus::Failed => self.progress,
            _ if self.total_steps == 0 => 0,
            _ => {
                let ratio = self.completed_steps as f64 / self.total_steps as f64;
                ((ratio * 100.0).round() as u8).min(99)
            }
        };
    }

    fn validate(&self) -> Result<()> {
        if self.progress > 100 {
            return Err(SyncError::Validation(format!(
                "progress {} is outside 0..=100",
                self.progress
            )));
        }
        let consistent = match self.status {
            ProgressStatus::Idle => self.progress == 0,
            ProgressStatus::Completed => self.progress == 100,
            ProgressStatus::Failed => true,
            _ => self.progress < 100,
        };
        if !consistent {
            return Err(SyncError::Validation(format!(
                "progress {} does not match status {}",
                self.progress, self.status
            )));
        }
        if self.completed_steps > self.total_steps {
            return Err(SyncError::Validation(format!(
                "completed steps {} exceed total steps {}",
                self.completed_steps, self.total_steps
            )));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(SyncError::Validation(format!(
                    "end time {} precedes start time {}",
                    end, self.start_time
                )));
            }
        }
        if let Some(receive) = &self.receive_progress {
            receive.validate("receive")?;
        }
        if let Some(send) = &self.send_progress {
            send.validate("send")?;
        }
        Ok(())
    }
}

// ============================================================================
// Observers
// ============================================================================

/// Receives every published change of a run's progress.
///
/// Notifications are best-effort; implementations must not block the run.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn initialize(&self, state: &ProgressState);
    async fn update_status(&self, state: &ProgressState);
    async fn update_current_step(&self, state: &ProgressState);
    async fn update_receive_progress(&self, state: &ProgressState);
    async fn update_send_progress(&self, state: &ProgressState);
    async fn complete(&self, state: &ProgressState);
    async fn fail(&self, state: &ProgressState);
    /// Drop any retained progress for the configuration.
    async fn clear(&self, config_id: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressObserver;

#[async_trait]
impl ProgressObserver for NoopProgressObserver {
    async fn initialize(&self, _state: &ProgressState) {}
    async fn update_status(&self, _state: &ProgressState) {}
    async fn update_current_step(&self, _state: &ProgressState) {}
    async fn update_receive_progress(&self, _state: &ProgressState) {}
    async fn update_send_progress(&self, _state: &ProgressState) {}
    async fn complete(&self, _state: &ProgressState) {}
    async fn fail(&self, _state: &ProgressState) {}
    async fn clear(&self, _config_id: &str) {}
}

/// Publishes progress as [`SyncEvent`]s on the core event bus.
#[derive(Clone)]
pub struct EventBusProgressObserver {
    bus: EventBus,
}

impl EventBusProgressObserver {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine.
        if self.bus.emit(CoreEvent::Sync(event)).is_err() {
            trace!("no subscribers for sync progress event");
        }
    }

    fn direction_event(
        state: &ProgressState,
        direction: &str,
        progress: Option<&DirectionProgress>,
    ) -> Option<SyncEvent> {
        progress.map(|p| SyncEvent::DirectionProgress {
            config_id: state.config_id.clone(),
            direction: direction.to_string(),
            status: p.status.as_str().to_string(),
            current_step: p.current_step,
            total_steps: p.total_steps,
            error: p.error.clone(),
        })
    }
}

#[async_trait]
impl ProgressObserver for EventBusProgressObserver {
    async fn initialize(&self, state: &ProgressState) {
        self.publish(SyncEvent::Started {
            config_id: state.config_id.clone(),
            storage_key: state.storage_key.clone(),
            total_steps: state.total_steps,
        });
    }

    async fn update_status(&self, state: &ProgressState) {
        self.publish(SyncEvent::StatusChanged {
            config_id: state.config_id.clone(),
            status: state.status.as_str().to_string(),
            progress: state.progress,
        });
    }

    async fn update_current_step(&self, state: &ProgressState) {
        self.publish(SyncEvent::StepChanged {
            config_id: state.config_id.clone(),
            step: state.current_step.clone(),
            completed_steps: state.completed_steps,
            total_steps: state.total_steps,
            progress: state.progress,
        });
    }

    async fn update_receive_progress(&self, state: &ProgressState) {
        if let Some(event) = Self::direction_event(state, "receive", state.receive_progress()) {
            self.publish(event);
        }
    }

    async fn update_send_progress(&self, state: &ProgressState) {
        if let Some(event) = Self::direction_event(state, "send", state.send_progress()) {
            self.publish(event);
        }
    }

    async fn complete(&self, state: &ProgressState) {
        self.publish(SyncEvent::Completed {
            config_id: state.config_id.clone(),
            storage_key: state.storage_key.clone(),
            duration_ms: state.elapsed_time(),
        });
    }

    async fn fail(&self, state: &ProgressState) {
        self.publish(SyncEvent::Failed {
            config_id: state.config_id.clone(),
            storage_key: state.storage_key.clone(),
            message: state.error.clone().unwrap_or_default(),
        });
    }

    async fn clear(&self, config_id: &str) {
        self.publish(SyncEvent::Cleared {
            config_id: config_id.to_string(),
        });
    }
}
