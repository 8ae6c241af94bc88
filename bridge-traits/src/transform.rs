//! Data transformation hook.
//!
//! A configuration may name a transformer that reshapes data between the
//! remote and local representations. The engine treats a failed transform as
//! fatal for that branch; it is never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Declarative description of a transformation, stored on the sync
/// configuration and interpreted by the host's [`Transformer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    /// Transformer identifier understood by the host
    pub name: String,
    /// Free-form options for the transformer
    #[serde(default)]
    pub options: Value,
}

impl TransformSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Result of running a transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransformOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, data: Value, spec: &TransformSpec) -> Result<TransformOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_deserializes_without_options() {
        let spec: TransformSpec = serde_json::from_value(json!({ "name": "flatten" })).unwrap();
        assert_eq!(spec, TransformSpec::new("flatten"));
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = TransformOutcome::ok(json!([1, 2]));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = TransformOutcome::failed("bad shape");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("bad shape"));
    }
}
