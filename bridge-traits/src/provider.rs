//! Remote provider abstractions.
//!
//! Exactly two kinds of remote system are known to the sync engine. Each kind
//! has its own capability trait; selection happens through [`ProviderKind`]
//! rather than by probing an adapter for methods.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

/// Named connection parameters (credentials, project ids, resource ids).
pub type ProviderInputs = HashMap<String, String>;

/// Kind of remote provider a sync configuration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Document-database style remote (collections of JSON documents)
    DocumentDatabase,
    /// Spreadsheet style remote (ranges of cells)
    Tabular,
}

impl ProviderKind {
    /// Parse a configuration's raw sync method.
    ///
    /// Returns `None` for methods this engine does not know.
    pub fn from_method(method: &str) -> Option<Self> {
        match method.trim().to_ascii_lowercase().as_str() {
            "document_database" | "document" | "firestore" => Some(Self::DocumentDatabase),
            "tabular" | "tabular_sheet" | "sheet" | "sheets" => Some(Self::Tabular),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentDatabase => "document_database",
            Self::Tabular => "tabular",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document-database style provider.
///
/// Adapters own authentication, wire format and network timeouts. Failures
/// should be reported as `BridgeError::OperationFailed` so the engine can
/// retry them.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Establish (or refresh) a session using the configuration's inputs.
    async fn connect(&self, inputs: &ProviderInputs) -> Result<()>;

    /// Fetch a single document. `Ok(None)` means the document does not exist.
    async fn query_by_id(&self, collection: &str, document_id: &str) -> Result<Option<Value>>;

    /// Create a new document and return its remote id.
    async fn create_record(&self, collection: &str, record: Value) -> Result<String>;
}

/// Spreadsheet style provider.
#[async_trait]
pub trait TabularProvider: Send + Sync {
    /// Establish (or refresh) a session using the configuration's inputs.
    async fn connect(&self, inputs: &ProviderInputs) -> Result<()>;

    /// Read a rectangular range in A1 notation. Rows may be ragged.
    async fn get_range(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<Value>>>;

    /// Overwrite a range starting at the given A1 anchor.
    async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        rows: Vec<Vec<Value>>,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_spellings() {
        assert_eq!(
            ProviderKind::from_method("firestore"),
            Some(ProviderKind::DocumentDatabase)
        );
        assert_eq!(
            ProviderKind::from_method(" Document_Database "),
            Some(ProviderKind::DocumentDatabase)
        );
        assert_eq!(
            ProviderKind::from_method("SHEETS"),
            Some(ProviderKind::Tabular)
        );
        assert_eq!(
            ProviderKind::from_method("tabular_sheet"),
            Some(ProviderKind::Tabular)
        );
        assert_eq!(ProviderKind::from_method("ftp"), None);
        assert_eq!(ProviderKind::from_method(""), None);
    }

    #[test]
    fn test_kind_round_trips_through_its_name() {
        for kind in [ProviderKind::DocumentDatabase, ProviderKind::Tabular] {
            assert_eq!(ProviderKind::from_method(kind.as_str()), Some(kind));
            assert_eq!(kind.to_string(), kind.as_str());
        }
    }
}
