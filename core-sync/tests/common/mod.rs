//! Shared doubles for the orchestration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::MemoryLocalStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    DocumentProvider, LocalStore, ProviderInputs, TabularProvider, TransformOutcome,
    TransformSpec, Transformer,
};
use core_async::time::Duration;
use core_sync::{
    HistoryStore, InMemoryHistoryStore, OrchestratorConfig, ProgressObserver, ProgressSnapshot,
    ProgressState, ProviderRegistry, RetryPolicy, SyncOrchestrator,
};
use mockall::mock;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

mock! {
    pub Documents {}

    #[async_trait]
    impl DocumentProvider for Documents {
        async fn connect(&self, inputs: &ProviderInputs) -> BridgeResult<()>;
        async fn query_by_id(
            &self,
            collection: &str,
            document_id: &str,
        ) -> BridgeResult<Option<Value>>;
        async fn create_record(&self, collection: &str, record: Value) -> BridgeResult<String>;
    }
}

mock! {
    pub Sheets {}

    #[async_trait]
    impl TabularProvider for Sheets {
        async fn connect(&self, inputs: &ProviderInputs) -> BridgeResult<()>;
        async fn get_range(
            &self,
            spreadsheet_id: &str,
            range: &str,
        ) -> BridgeResult<Vec<Vec<Value>>>;
        async fn write_range(
            &self,
            spreadsheet_id: &str,
            range: &str,
            rows: Vec<Vec<Value>>,
        ) -> BridgeResult<()>;
    }
}

/// One observer notification, with the state it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub call: &'static str,
    pub snapshot: Option<ProgressSnapshot>,
    pub config_id: String,
}

#[derive(Default)]
pub struct RecordingObserver {
    calls: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: &'static str, state: &ProgressState) {
        self.calls.lock().unwrap().push(Observed {
            call,
            snapshot: Some(state.to_snapshot()),
            config_id: state.config_id().to_string(),
        });
    }

    pub fn calls(&self) -> Vec<Observed> {
        self.calls.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|o| o.call).collect()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|o| o.call == call).count()
    }

    /// State carried by the last notification that had one.
    pub fn last_snapshot(&self) -> ProgressSnapshot {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|o| o.snapshot)
            .expect("no snapshot recorded")
    }
}

#[async_trait]
impl ProgressObserver for RecordingObserver {
    async fn initialize(&self, state: &ProgressState) {
        self.record("initialize", state);
    }
    async fn update_status(&self, state: &ProgressState) {
        self.record("status", state);
    }
    async fn update_current_step(&self, state: &ProgressState) {
        self.record("step", state);
    }
    async fn update_receive_progress(&self, state: &ProgressState) {
        self.record("receive", state);
    }
    async fn update_send_progress(&self, state: &ProgressState) {
        self.record("send", state);
    }
    async fn complete(&self, state: &ProgressState) {
        self.record("complete", state);
    }
    async fn fail(&self, state: &ProgressState) {
        self.record("fail", state);
    }
    async fn clear(&self, config_id: &str) {
        self.calls.lock().unwrap().push(Observed {
            call: "clear",
            snapshot: None,
            config_id: config_id.to_string(),
        });
    }
}

/// Uppercases string values under `"name"`; rejects when asked to.
pub struct UppercaseNames;

#[async_trait]
impl Transformer for UppercaseNames {
    async fn transform(&self, data: Value, spec: &TransformSpec) -> BridgeResult<TransformOutcome> {
        if spec.options.get("reject").and_then(Value::as_bool) == Some(true) {
            return Ok(TransformOutcome::failed("rejected by options"));
        }
        let mut data = data;
        if let Some(name) = data.get("name").and_then(Value::as_str).map(str::to_uppercase) {
            data["name"] = json!(name);
        }
        Ok(TransformOutcome::ok(data))
    }
}

/// Quick retries so tests do not wait on real backoff.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        default_retry_policy: RetryPolicy::new(3, 1),
        progress_clear_delay: Duration::from_millis(20),
        history_retention: 0,
    }
}

pub struct Harness {
    pub orchestrator: SyncOrchestrator,
    pub store: Arc<MemoryLocalStore>,
    pub history: Arc<InMemoryHistoryStore>,
    pub observer: Arc<RecordingObserver>,
}

pub fn harness(providers: ProviderRegistry) -> Harness {
    harness_with(providers, MemoryLocalStore::new(), fast_config())
}

pub fn harness_with(
    providers: ProviderRegistry,
    store: MemoryLocalStore,
    config: OrchestratorConfig,
) -> Harness {
    let store = Arc::new(store);
    let history = Arc::new(InMemoryHistoryStore::new());
    let observer = RecordingObserver::new();

    let orchestrator = SyncOrchestrator::new(
        providers,
        Arc::clone(&store) as Arc<dyn LocalStore>,
        Arc::clone(&history) as Arc<dyn HistoryStore>,
        config,
    )
    .with_observer(Arc::clone(&observer) as Arc<dyn ProgressObserver>)
    .with_transformer(Arc::new(UppercaseNames));

    Harness {
        orchestrator,
        store,
        history,
        observer,
    }
}
