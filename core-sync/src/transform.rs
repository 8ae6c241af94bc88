//! Optional reshaping step shared by fetch and push.

use bridge_traits::{TransformSpec, Transformer};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Run `data` through the configured transformer, if the configuration asks
/// for one. Any failure is a non-retryable transform error.
pub(crate) async fn apply_transform(
    transformer: Option<&Arc<dyn Transformer>>,
    spec: Option<&TransformSpec>,
    data: Value,
) -> Result<Value> {
    let Some(spec) = spec else {
        return Ok(data);
    };
    let transformer = transformer.ok_or_else(|| {
        SyncError::Configuration(format!(
            "Transformer '{}' requested but no transformer is configured",
            spec.name
        ))
    })?;

    debug!(transformer = %spec.name, "Applying transform");
    let outcome = transformer
        .transform(data, spec)
        .await
        .map_err(|e| SyncError::Transform(e.to_string()))?;

    if outcome.success {
        Ok(outcome.data)
    } else {
        Err(SyncError::Transform(
            outcome
                .error
                .unwrap_or_else(|| format!("transformer '{}' reported failure", spec.name)),
        ))
    }
}
