//! Sync configurations as the engine consumes them.
//!
//! Configurations are authored elsewhere and handed to the orchestrator
//! read-only. [`ConfigProvider`] is the seam through which the service layer
//! looks one up by its storage key.

use async_trait::async_trait;
use bridge_traits::{ProviderInputs, ProviderKind, TransformSpec};
use core_async::sync::RwLock;
use core_runtime::logging::redact_if_sensitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

// ============================================================================
// Direction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Remote to local only
    ReceiveOnly,
    /// Local to remote only
    SendOnly,
    /// Both directions, run concurrently
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReceiveOnly => "receive_only",
            Self::SendOnly => "send_only",
            Self::Bidirectional => "bidirectional",
        }
    }

    pub fn includes_receive(&self) -> bool {
        matches!(self, Self::ReceiveOnly | Self::Bidirectional)
    }

    pub fn includes_send(&self) -> bool {
        matches!(self, Self::SendOnly | Self::Bidirectional)
    }
}

impl FromStr for SyncDirection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "receive_only" => Ok(Self::ReceiveOnly),
            "send_only" => Ok(Self::SendOnly),
            "bidirectional" => Ok(Self::Bidirectional),
            _ => Err(SyncError::Configuration(format!(
                "Unknown sync direction: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// A named connection parameter such as a credential or a resource id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncInput {
    pub name: String,
    pub value: String,
}

/// A local store key written on receive and read on send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutput {
    pub key: String,
    /// Used when the remote value is missing or null.
    #[serde(default)]
    pub default_value: Value,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfiguration {
    pub id: String,
    pub storage_key: String,
    pub sync_method: String,
    pub direction: SyncDirection,
    #[serde(default)]
    pub inputs: Vec<SyncInput>,
    #[serde(default)]
    pub outputs: Vec<SyncOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<TransformSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SyncConfiguration {
    pub fn new(
        id: impl Into<String>,
        storage_key: impl Into<String>,
        sync_method: impl Into<String>,
        direction: SyncDirection,
    ) -> Self {
        Self {
            id: id.into(),
            storage_key: storage_key.into(),
            sync_method: sync_method.into(),
            direction,
            inputs: Vec::new(),
            outputs: Vec::new(),
            transformer: None,
            retry_policy: None,
            enabled: true,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.push(SyncInput {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, default_value: Value) -> Self {
        self.outputs.push(SyncOutput {
            key: key.into(),
            default_value,
        });
        self
    }

    pub fn with_transformer(mut self, spec: TransformSpec) -> Self {
        self.transformer = Some(spec);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Resolve the raw sync method into a provider kind.
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        ProviderKind::from_method(&self.sync_method).ok_or_else(|| {
            SyncError::Configuration(format!("Unsupported sync method: {}", self.sync_method))
        })
    }

    /// First input with the given name.
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| input.value.as_str())
    }

    /// Like [`input`](Self::input) but blank values count as missing.
    pub fn require_input(&self, name: &str) -> Result<&str> {
        match self.input(name).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(SyncError::Configuration(format!(
                "Missing required input: {}",
                name
            ))),
        }
    }

    /// All inputs as the map handed to a provider's `connect`.
    pub fn provider_inputs(&self) -> ProviderInputs {
        self.inputs
            .iter()
            .map(|input| (input.name.clone(), input.value.clone()))
            .collect()
    }

    /// `name=value` pairs for log output, credential values redacted.
    pub fn loggable_inputs(&self) -> String {
        self.inputs
            .iter()
            .map(|input| {
                let value = redact_if_sensitive(&input.name, &input.value);
                format!("{}={}", input.name, value)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn output_keys(&self) -> Vec<String> {
        self.outputs.iter().map(|output| output.key.clone()).collect()
    }
}

// ============================================================================
// Lookup
// ============================================================================

/// Source of sync configurations, keyed by storage key.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn load_by_key(&self, key: &str) -> Result<Option<SyncConfiguration>>;
}

/// Configurations held in memory, for hosts that own their configuration list.
#[derive(Default)]
pub struct InMemoryConfigProvider {
    configs: RwLock<HashMap<String, SyncConfiguration>>,
}

impl InMemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = SyncConfiguration>) -> Self {
        let configs = configs
            .into_iter()
            .map(|config| (config.storage_key.clone(), config))
            .collect();
        Self {
            configs: RwLock::new(configs),
        }
    }

    /// Insert or replace the configuration for its storage key.
    pub async fn insert(&self, config: SyncConfiguration) -> Option<SyncConfiguration> {
        self.configs
            .write()
            .await
            .insert(config.storage_key.clone(), config)
    }

    pub async fn remove(&self, key: &str) -> Option<SyncConfiguration> {
        self.configs.write().await.remove(key)
    }

    pub async fn list(&self) -> Vec<SyncConfiguration> {
        let mut configs: Vec<_> = self.configs.read().await.values().cloned().collect();
        configs.sort_by(|a, b| a.storage_key.cmp(&b.storage_key));
        configs
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn load_by_key(&self, key: &str) -> Result<Option<SyncConfiguration>> {
        Ok(self.configs.read().await.get(key).cloned())
    }
}
