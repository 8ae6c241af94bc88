//! Periodic sync registry.
//!
//! Hosts that want a configuration synced on an interval register it here.
//! The registry is an ordinary value owned by the caller: every scheduled
//! key is a spawned task ticking [`SyncService::sync_by_key`], and dropping or
//! shutting down the registry stops all of them.

use core_async::task::JoinHandle;
use core_async::time::{interval, Duration, MissedTickBehavior};
use core_runtime::events::{CoreEvent, ScheduleEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::SyncService;

struct ScheduledSync {
    interval: Duration,
    handle: JoinHandle<()>,
}

pub struct SyncScheduleRegistry {
    service: Arc<SyncService>,
    entries: Mutex<HashMap<String, ScheduledSync>>,
}

impl SyncScheduleRegistry {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self {
            service,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Sync `key` every `every`, starting one interval from now.
    ///
    /// Scheduling a key that is already scheduled replaces its interval.
    pub async fn schedule(&self, key: &str, every: Duration) -> Result<()> {
        if every.is_zero() {
            return Err(CoreError::InvalidSchedule(format!(
                "interval for '{}' must be greater than zero",
                key
            )));
        }
        if self.service.config_provider().load_by_key(key).await?.is_none() {
            return Err(CoreError::ConfigNotFound(key.to_string()));
        }

        let service = Arc::clone(&self.service);
        let task_key = key.to_string();
        let handle = core_async::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let result = service.sync_by_key(&task_key).await;
                if let Some(error) = result.error {
                    warn!(storage_key = %task_key, "Scheduled sync failed: {}", error);
                } else {
                    debug!(storage_key = %task_key, "Scheduled sync succeeded");
                }
            }
        });

        let previous = self.lock().insert(
            key.to_string(),
            ScheduledSync {
                interval: every,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }

        info!(storage_key = %key, interval_ms = every.as_millis() as u64, "Sync scheduled");
        let _ = self
            .service
            .events()
            .emit(CoreEvent::Schedule(ScheduleEvent::Scheduled {
                storage_key: key.to_string(),
                interval_ms: every.as_millis() as u64,
            }));
        Ok(())
    }

    /// Stop syncing `key`. Returns whether it was scheduled.
    pub fn unschedule(&self, key: &str) -> bool {
        let Some(entry) = self.lock().remove(key) else {
            return false;
        };
        entry.handle.abort();

        info!(storage_key = %key, "Sync unscheduled");
        let _ = self
            .service
            .events()
            .emit(CoreEvent::Schedule(ScheduleEvent::Unscheduled {
                storage_key: key.to_string(),
            }));
        true
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn interval_of(&self, key: &str) -> Option<Duration> {
        self.lock().get(key).map(|entry| entry.interval)
    }

    /// Scheduled keys in sorted order.
    pub fn scheduled_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every scheduled sync.
    pub fn shutdown(&self) {
        let keys = self.scheduled_keys();
        for key in &keys {
            self.unschedule(key);
        }
        if !keys.is_empty() {
            info!(count = keys.len(), "Schedule registry shut down");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ScheduledSync>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncScheduleRegistry {
    fn drop(&mut self) {
        for (_, entry) in self.lock().drain() {
            entry.handle.abort();
        }
    }
}
