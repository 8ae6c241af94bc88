//! Structured results returned to callers of a sync run.

use serde::{Deserialize, Serialize};

use crate::config::SyncDirection;
use crate::retry::RetryOutcome;

/// Result of the receive (remote to local) branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReceiveResult {
    pub fn from_outcome(outcome: &RetryOutcome<usize>) -> Self {
        match &outcome.result {
            Ok(count) => Self {
                success: true,
                received_count: Some(*count as u64),
                error: None,
            },
            Err(error) => Self {
                success: false,
                received_count: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Result of the send (local to remote) branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn from_outcome(outcome: &RetryOutcome<usize>) -> Self {
        match &outcome.result {
            Ok(count) => Self {
                success: true,
                sent_count: Some(*count as u64),
                error: None,
            },
            Err(error) => Self {
                success: false,
                sent_count: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// What `execute()` hands back. Failures are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunResult {
    pub success: bool,
    pub sync_direction: SyncDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_result: Option<ReceiveResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_result: Option<SendResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncRunResult {
    /// A failed run with no branch results.
    pub fn failure(sync_direction: SyncDirection, error: impl Into<String>) -> Self {
        Self {
            success: false,
            sync_direction,
            receive_result: None,
            send_result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;

    #[test]
    fn test_branch_results_from_outcomes() {
        let ok = RetryOutcome {
            result: Ok(3usize),
            attempts_made: 1,
        };
        assert_eq!(
            ReceiveResult::from_outcome(&ok),
            ReceiveResult {
                success: true,
                received_count: Some(3),
                error: None
            }
        );

        let failed: RetryOutcome<usize> = RetryOutcome {
            result: Err(SyncError::Provider("Send error".into())),
            attempts_made: 3,
        };
        let send = SendResult::from_outcome(&failed);
        assert!(!send.success);
        assert_eq!(send.error.as_deref(), Some("Send error"));
    }

    #[test]
    fn test_run_result_json_shape() {
        let result = SyncRunResult {
            success: true,
            sync_direction: SyncDirection::ReceiveOnly,
            receive_result: Some(ReceiveResult {
                success: true,
                received_count: Some(1),
                error: None,
            }),
            send_result: None,
            error: None,
        };

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": true,
                "syncDirection": "receive_only",
                "receiveResult": { "success": true, "receivedCount": 1 }
            })
        );
    }

    #[test]
    fn test_failure_constructor() {
        let result =
            SyncRunResult::failure(SyncDirection::SendOnly, "Sync configuration is disabled");
        assert!(!result.success);
        assert!(result.receive_result.is_none());
        assert_eq!(result.error.as_deref(), Some("Sync configuration is disabled"));
    }
}
