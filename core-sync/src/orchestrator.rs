//! # Sync Orchestrator
//!
//! Drives one run of a sync configuration end to end.
//!
//! ## Workflow
//!
//! 1. Publish a fresh [`ProgressState`] and open a history record
//! 2. Reject disabled configurations and validate the method and retry policy
//! 3. Run the receive and/or send branch with retries. A bidirectional run
//!    joins both branches and waits for both to settle
//! 4. Close and persist the history record (failures are logged only)
//! 5. Mark progress completed or failed and schedule its clearing
//!
//! `execute()` never returns an error and never panics: every failure,
//! including a panic inside a branch, ends up in the returned
//! [`SyncRunResult`], the history record and the progress observer.
//!
//! Runs for the same storage key are serialized; runs for different keys
//! proceed independently.

use bridge_traits::{Clock, LocalStore, SystemClock, Transformer};
use core_async::sync::Mutex as AsyncMutex;
use core_async::task::JoinHandle;
use core_async::time::{sleep, Duration};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, HistoryEvent};
use futures::future::{join, FutureExt};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{SyncConfiguration, SyncDirection};
use crate::error::{Result, SyncError};
use crate::fetcher::DataFetcher;
use crate::history::{
    HistoryRecord, HistoryStatus, HistoryStore, PendingHistoryRecord, RunSummary,
};
use crate::outcome::{ReceiveResult, SendResult, SyncRunResult};
use crate::progress::{
    DirectionProgress, DirectionStatus, NoopProgressObserver, ProgressObserver, ProgressState,
    ProgressStatus,
};
use crate::providers::ProviderRegistry;
use crate::pusher::DataPusher;
use crate::retry::{execute_with_attempt, RetryOutcome, RetryPolicy};

pub const DISABLED_MESSAGE: &str = "Sync configuration is disabled";
pub const DEFAULT_PROGRESS_CLEAR_DELAY: Duration = Duration::from_millis(2_000);

/// Steps of a direction sub-record: one unit of work per branch.
const BRANCH_STEPS: u32 = 1;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Used when a configuration carries no retry policy of its own.
    pub default_retry_policy: RetryPolicy,
    /// Grace period before a finished run's progress is cleared.
    pub progress_clear_delay: Duration,
    /// Records kept per configuration; 0 keeps everything.
    pub history_retention: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_retry_policy: RetryPolicy::default(),
            progress_clear_delay: DEFAULT_PROGRESS_CLEAR_DELAY,
            history_retention: 0,
        }
    }
}

impl From<&CoreConfig> for OrchestratorConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            default_retry_policy: RetryPolicy::new(
                config.default_max_attempts,
                config.default_initial_delay_ms,
            ),
            progress_clear_delay: Duration::from_millis(config.progress_clear_delay_ms),
            history_retention: config.history_retention,
        }
    }
}

// ============================================================================
// Run bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Receive,
    Send,
}

/// Progress of one run, shared by the concurrently running branches.
struct RunTracker<'a> {
    state: AsyncMutex<ProgressState>,
    observer: &'a dyn ProgressObserver,
}

impl<'a> RunTracker<'a> {
    fn new(state: ProgressState, observer: &'a dyn ProgressObserver) -> Self {
        Self {
            state: AsyncMutex::new(state),
            observer,
        }
    }

    async fn initialize(&self) {
        let state = self.state.lock().await;
        self.observer.initialize(&state).await;
    }

    /// Count one finished step and name the next one.
    async fn advance(&self, next_step: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.increment_completed_steps()?;
        state.set_current_step(next_step)?;
        self.observer.update_current_step(&state).await;
        Ok(())
    }

    async fn set_status(&self, status: ProgressStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.set_status(status)?;
        self.observer.update_status(&state).await;
        Ok(())
    }

    async fn set_branch(&self, branch: Branch, progress: DirectionProgress) -> Result<()> {
        let mut state = self.state.lock().await;
        match branch {
            Branch::Receive => {
                state.set_receive_progress(progress)?;
                self.observer.update_receive_progress(&state).await;
            }
            Branch::Send => {
                state.set_send_progress(progress)?;
                self.observer.update_send_progress(&state).await;
            }
        }
        Ok(())
    }

    /// Record a settled branch and count its step.
    async fn settle(&self, branch: Branch, outcome: &RetryOutcome<usize>) -> Result<()> {
        let progress = match &outcome.result {
            Ok(_) => DirectionProgress::completed(BRANCH_STEPS),
            Err(error) => DirectionProgress::failed(BRANCH_STEPS, error.to_string()),
        };
        self.set_branch(branch, progress).await?;

        let mut state = self.state.lock().await;
        state.increment_completed_steps()?;
        self.observer.update_current_step(&state).await;

        // Receive finished first while send is still running.
        let send_running = state
            .send_progress()
            .map(|p| p.status == DirectionStatus::InProgress)
            .unwrap_or(false);
        if branch == Branch::Receive && send_running {
            state.set_status(ProgressStatus::Sending)?;
            self.observer.update_status(&state).await;
        }
        Ok(())
    }

    async fn finish(&self, summary: &RunSummary, now: i64) {
        let mut state = self.state.lock().await;
        if summary.status == HistoryStatus::Success {
            state.complete_at(now);
            self.observer.complete(&state).await;
        } else {
            let reason = summary
                .error
                .clone()
                .unwrap_or_else(|| "Sync failed".to_string());
            state.fail_at(reason, now);
            self.observer.fail(&state).await;
        }
    }
}

/// What the inner run produced: the caller-facing result and the data for
/// the history record.
struct RunOutcome {
    result: SyncRunResult,
    summary: RunSummary,
}

impl RunOutcome {
    fn failed(direction: SyncDirection, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            result: SyncRunResult::failure(direction, error.clone()),
            summary: RunSummary::failed(error),
        }
    }
}

struct ClearTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerMap = Arc<Mutex<HashMap<String, ClearTimer>>>;

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    fetcher: DataFetcher,
    pusher: DataPusher,
    history: Arc<dyn HistoryStore>,
    observer: Arc<dyn ProgressObserver>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    config: OrchestratorConfig,
    clear_timers: TimerMap,
    timer_generation: AtomicU64,
    storage_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(
        providers: ProviderRegistry,
        local_store: Arc<dyn LocalStore>,
        history: Arc<dyn HistoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            fetcher: DataFetcher::new(providers.clone(), Arc::clone(&local_store)),
            pusher: DataPusher::new(providers, local_store),
            history,
            observer: Arc::new(NoopProgressObserver),
            clock: Arc::new(SystemClock),
            events: None,
            config,
            clear_timers: Arc::new(Mutex::new(HashMap::new())),
            timer_generation: AtomicU64::new(0),
            storage_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.fetcher = self.fetcher.with_transformer(Arc::clone(&transformer));
        self.pusher = self.pusher.with_transformer(transformer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish `HistoryEvent`s on this bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Clear timers scheduled but not yet fired.
    pub fn pending_clear_count(&self) -> usize {
        lock_timers(&self.clear_timers).len()
    }

    /// Abort every pending clear timer without clearing.
    pub fn cancel_pending_clears(&self) {
        for (_, timer) in lock_timers(&self.clear_timers).drain() {
            timer.handle.abort();
        }
    }

    /// Run one sync of `config`. Never fails; see [`SyncRunResult`].
    #[instrument(
        skip(self, config),
        fields(
            config_id = %config.id,
            storage_key = %config.storage_key,
            direction = %config.direction
        )
    )]
    pub async fn execute(&self, config: &SyncConfiguration) -> SyncRunResult {
        let lock = self.storage_lock(&config.storage_key);
        let guard = Arc::clone(&lock).lock_owned().await;

        let started_at = self.clock.unix_timestamp_millis();
        let total_steps = 2 + if config.direction == SyncDirection::Bidirectional {
            2
        } else {
            1
        };
        info!(total_steps, "Starting sync run");

        let tracker = RunTracker::new(
            ProgressState::create_at(&config.id, &config.storage_key, total_steps, started_at),
            self.observer.as_ref(),
        );
        contain(tracker.initialize(), "progress observer").await;
        let pending = PendingHistoryRecord::begin(config, started_at);

        let outcome = match AssertUnwindSafe(self.run(config, &tracker))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!(error_kind = %error.kind(), "Sync run aborted: {}", error);
                RunOutcome::failed(config.direction, error.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Sync run panicked: {}", message);
                RunOutcome::failed(
                    config.direction,
                    SyncError::Unexpected(message).to_string(),
                )
            }
        };

        let ended_at = self.clock.unix_timestamp_millis();
        let record = pending.complete(ended_at, outcome.summary.clone());
        contain(self.persist(&record), "history store").await;

        contain(tracker.finish(&outcome.summary, ended_at), "progress observer").await;
        self.schedule_clear(&config.id);

        drop(guard);
        self.release_storage_lock(&config.storage_key, lock);

        match &outcome.result.error {
            None => info!(duration_ms = record.duration_ms(), "Sync run succeeded"),
            Some(error) => warn!(
                status = %record.status,
                duration_ms = record.duration_ms(),
                "Sync run finished with errors: {}",
                error
            ),
        }
        outcome.result
    }

    async fn run(
        &self,
        config: &SyncConfiguration,
        tracker: &RunTracker<'_>,
    ) -> Result<RunOutcome> {
        tracker.advance("Validating configuration").await?;

        if !config.enabled {
            debug!("Configuration disabled, skipping");
            return Ok(RunOutcome::failed(config.direction, DISABLED_MESSAGE));
        }

        let policy = self.resolve_policy(config)?;
        let kind = config.provider_kind()?;
        debug!(provider = %kind, max_attempts = policy.max_attempts, "Configuration validated");

        match config.direction {
            SyncDirection::ReceiveOnly => {
                tracker.advance("Receiving data").await?;
                tracker.set_status(ProgressStatus::Receiving).await?;
                tracker
                    .set_branch(Branch::Receive, DirectionProgress::in_progress(BRANCH_STEPS))
                    .await?;

                let receive = self.receive(config, &policy).await;
                tracker.settle(Branch::Receive, &receive).await?;
                Ok(single_branch(config.direction, Branch::Receive, receive))
            }
            SyncDirection::SendOnly => {
                tracker.advance("Sending data").await?;
                tracker.set_status(ProgressStatus::Sending).await?;
                tracker
                    .set_branch(Branch::Send, DirectionProgress::in_progress(BRANCH_STEPS))
                    .await?;

                let send = self.send(config, &policy).await;
                tracker.settle(Branch::Send, &send).await?;
                Ok(single_branch(config.direction, Branch::Send, send))
            }
            SyncDirection::Bidirectional => {
                tracker.advance("Receiving and sending data").await?;
                tracker.set_status(ProgressStatus::Receiving).await?;
                tracker
                    .set_branch(Branch::Receive, DirectionProgress::in_progress(BRANCH_STEPS))
                    .await?;
                tracker
                    .set_branch(Branch::Send, DirectionProgress::in_progress(BRANCH_STEPS))
                    .await?;

                let receive = async {
                    let outcome = self.receive(config, &policy).await;
                    let settled = tracker.settle(Branch::Receive, &outcome).await;
                    (outcome, settled)
                };
                let send = async {
                    let outcome = self.send(config, &policy).await;
                    let settled = tracker.settle(Branch::Send, &outcome).await;
                    (outcome, settled)
                };

                // Settle-all: neither branch cancels the other.
                let ((receive, receive_settled), (send, send_settled)) =
                    join(receive, send).await;
                receive_settled?;
                send_settled?;

                Ok(both_branches(receive, send))
            }
        }
    }

    async fn receive(
        &self,
        config: &SyncConfiguration,
        policy: &RetryPolicy,
    ) -> RetryOutcome<usize> {
        let fetcher = &self.fetcher;
        settle_branch(
            execute_with_attempt(|_| fetcher.fetch(config), policy, "receive"),
            Branch::Receive,
        )
        .await
    }

    async fn send(&self, config: &SyncConfiguration, policy: &RetryPolicy) -> RetryOutcome<usize> {
        let pusher = &self.pusher;
        settle_branch(
            execute_with_attempt(|_| pusher.push(config), policy, "send"),
            Branch::Send,
        )
        .await
    }

    fn resolve_policy(&self, config: &SyncConfiguration) -> Result<RetryPolicy> {
        let policy = config
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.config.default_retry_policy.clone());
        policy.validate()?;
        Ok(policy)
    }

    async fn persist(&self, record: &HistoryRecord) {
        if let Err(e) = self.history.append(record).await {
            warn!(record_id = %record.id, "Failed to persist sync history: {}", e);
            return;
        }

        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::History(HistoryEvent::Recorded {
                record_id: record.id.to_string(),
                config_id: record.config_id.clone(),
                status: record.status.as_str().to_string(),
                retry_count: record.retry_count,
            }));
        }

        if self.config.history_retention > 0 {
            match self
                .history
                .prune(&record.config_id, self.config.history_retention)
                .await
            {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Pruned old history records"),
                Err(e) => warn!("Failed to prune sync history: {}", e),
            }
        }
    }

    /// Clear the configuration's progress after the grace delay, replacing
    /// any clear already pending for it.
    fn schedule_clear(&self, config_id: &str) {
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst);
        let timers = Arc::clone(&self.clear_timers);
        let observer = Arc::clone(&self.observer);
        let delay = self.config.progress_clear_delay;
        let id = config_id.to_string();

        // Held across spawn so a timer that fires at once cannot miss its own entry.
        let mut pending = lock_timers(&self.clear_timers);
        let handle = core_async::spawn(async move {
            sleep(delay).await;
            contain(observer.clear(&id), "progress observer").await;

            let mut timers = lock_timers(&timers);
            if timers.get(&id).map(|t| t.generation) == Some(generation) {
                timers.remove(&id);
            }
        });

        if let Some(previous) = pending.insert(
            config_id.to_string(),
            ClearTimer { generation, handle },
        ) {
            previous.handle.abort();
        }
    }

    fn storage_lock(&self, storage_key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .storage_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(storage_key.to_string()).or_default())
    }

    fn release_storage_lock(&self, storage_key: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self
            .storage_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller hold it: nobody is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(storage_key);
        }
    }
}

fn lock_timers(
    timers: &Mutex<HashMap<String, ClearTimer>>,
) -> std::sync::MutexGuard<'_, HashMap<String, ClearTimer>> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turn a panic inside a branch into a failed outcome so the other branch
/// still settles.
async fn settle_branch<F>(branch_future: F, branch: Branch) -> RetryOutcome<usize>
where
    F: Future<Output = RetryOutcome<usize>>,
{
    match AssertUnwindSafe(branch_future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(branch = ?branch, "Sync branch panicked: {}", message);
            RetryOutcome {
                result: Err(SyncError::Unexpected(message)),
                attempts_made: 1,
            }
        }
    }
}

/// Run host code whose panics must not escape `execute()`.
async fn contain<F>(future: F, component: &str)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(future).catch_unwind().await {
        let message = panic_message(panic.as_ref());
        error!(component, "Panic in {} ignored: {}", component, message);
    }
}

fn single_branch(
    direction: SyncDirection,
    branch: Branch,
    outcome: RetryOutcome<usize>,
) -> RunOutcome {
    let (receive_result, send_result) = match branch {
        Branch::Receive => (Some(ReceiveResult::from_outcome(&outcome)), None),
        Branch::Send => (None, Some(SendResult::from_outcome(&outcome))),
    };
    let error = outcome.error_message();
    let status = if error.is_none() {
        HistoryStatus::Success
    } else {
        HistoryStatus::Failed
    };

    RunOutcome {
        result: SyncRunResult {
            success: error.is_none(),
            sync_direction: direction,
            receive_result: receive_result.clone(),
            send_result: send_result.clone(),
            error: error.clone(),
        },
        summary: RunSummary {
            status,
            retry_count: outcome.retries(),
            receive_result,
            send_result,
            error,
        },
    }
}

fn both_branches(receive: RetryOutcome<usize>, send: RetryOutcome<usize>) -> RunOutcome {
    let receive_result = ReceiveResult::from_outcome(&receive);
    let send_result = SendResult::from_outcome(&send);
    let retry_count = receive.retries() + send.retries();

    let (status, error) = match (receive.error_message(), send.error_message()) {
        (None, None) => (HistoryStatus::Success, None),
        (Some(r), Some(s)) => (
            HistoryStatus::Failed,
            Some(format!("Receive failed: {}; Send failed: {}", r, s)),
        ),
        (Some(r), None) => (
            HistoryStatus::Partial,
            Some(format!("Receive failed: {}", r)),
        ),
        (None, Some(s)) => (
            HistoryStatus::Partial,
            Some(format!("Send failed: {}", s)),
        ),
    };

    RunOutcome {
        result: SyncRunResult {
            success: status == HistoryStatus::Success,
            sync_direction: SyncDirection::Bidirectional,
            receive_result: Some(receive_result.clone()),
            send_result: Some(send_result.clone()),
            error: error.clone(),
        },
        summary: RunSummary {
            status,
            retry_count,
            receive_result: Some(receive_result),
            send_result: Some(send_result),
            error,
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "sync run panicked".to_string()
    }
}
