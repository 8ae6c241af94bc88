//! Provider registry and the inputs each provider kind requires.

use bridge_traits::{DocumentProvider, ProviderKind, TabularProvider};
use std::sync::Arc;

use crate::config::SyncConfiguration;
use crate::error::{Result, SyncError};

pub const INPUT_COLLECTION: &str = "collection";
pub const INPUT_DOCUMENT_ID: &str = "document_id";
pub const INPUT_SPREADSHEET_ID: &str = "spreadsheet_id";
pub const INPUT_RANGE: &str = "range";

/// Range read when a tabular configuration does not name one.
pub const DEFAULT_FETCH_RANGE: &str = "A1:Z1000";
/// Anchor written when a tabular configuration does not name one.
pub const DEFAULT_PUSH_RANGE: &str = "A1";

/// The provider adapters available to a sync engine, one per kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    document: Option<Arc<dyn DocumentProvider>>,
    tabular: Option<Arc<dyn TabularProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, provider: Arc<dyn DocumentProvider>) -> Self {
        self.document = Some(provider);
        self
    }

    pub fn with_tabular(mut self, provider: Arc<dyn TabularProvider>) -> Self {
        self.tabular = Some(provider);
        self
    }

    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::DocumentDatabase => self.document.is_some(),
            ProviderKind::Tabular => self.tabular.is_some(),
        }
    }

    pub fn registered_kinds(&self) -> Vec<ProviderKind> {
        [ProviderKind::DocumentDatabase, ProviderKind::Tabular]
            .into_iter()
            .filter(|kind| self.is_registered(*kind))
            .collect()
    }

    pub fn document(&self) -> Result<Arc<dyn DocumentProvider>> {
        self.document
            .clone()
            .ok_or_else(|| not_registered(ProviderKind::DocumentDatabase))
    }

    pub fn tabular(&self) -> Result<Arc<dyn TabularProvider>> {
        self.tabular
            .clone()
            .ok_or_else(|| not_registered(ProviderKind::Tabular))
    }
}

fn not_registered(kind: ProviderKind) -> SyncError {
    SyncError::Configuration(format!("No {} provider is registered", kind))
}

/// A single document, addressed by collection and id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTarget {
    pub collection: String,
    pub document_id: String,
}

impl DocumentTarget {
    pub fn for_fetch(config: &SyncConfiguration) -> Result<Self> {
        Ok(Self {
            collection: config.require_input(INPUT_COLLECTION)?.to_string(),
            document_id: config.require_input(INPUT_DOCUMENT_ID)?.to_string(),
        })
    }
}

/// Collection new documents are created in.
pub fn push_collection(config: &SyncConfiguration) -> Result<String> {
    Ok(config.require_input(INPUT_COLLECTION)?.to_string())
}

/// A spreadsheet range in A1 notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularTarget {
    pub spreadsheet_id: String,
    pub range: String,
}

impl TabularTarget {
    pub fn for_fetch(config: &SyncConfiguration) -> Result<Self> {
        Self::resolve(config, DEFAULT_FETCH_RANGE)
    }

    pub fn for_push(config: &SyncConfiguration) -> Result<Self> {
        Self::resolve(config, DEFAULT_PUSH_RANGE)
    }

    fn resolve(config: &SyncConfiguration, default_range: &str) -> Result<Self> {
        let spreadsheet_id = config.require_input(INPUT_SPREADSHEET_ID)?.to_string();
        let range = config
            .input(INPUT_RANGE)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(default_range)
            .to_string();
        Ok(Self {
            spreadsheet_id,
            range,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncDirection;

    fn sheet_config() -> SyncConfiguration {
        SyncConfiguration::new("cfg", "grid", "sheets", SyncDirection::Bidirectional)
            .with_input(INPUT_SPREADSHEET_ID, "sheet-1")
    }

    #[test]
    fn test_empty_registry_reports_configuration_error() {
        let registry = ProviderRegistry::new();
        assert!(registry.registered_kinds().is_empty());

        let error = registry.tabular().err().unwrap();
        assert!(matches!(error, SyncError::Configuration(_)));
        assert_eq!(error.to_string(), "No tabular provider is registered");
    }

    #[test]
    fn test_tabular_ranges_default_per_direction() {
        let config = sheet_config();
        assert_eq!(TabularTarget::for_fetch(&config).unwrap().range, DEFAULT_FETCH_RANGE);
        assert_eq!(TabularTarget::for_push(&config).unwrap().range, DEFAULT_PUSH_RANGE);

        let config = sheet_config().with_input(INPUT_RANGE, "Sheet2!B2:C9");
        assert_eq!(TabularTarget::for_fetch(&config).unwrap().range, "Sheet2!B2:C9");
    }

    #[test]
    fn test_document_fetch_needs_both_inputs() {
        let config = SyncConfiguration::new("cfg", "doc", "firestore", SyncDirection::ReceiveOnly)
            .with_input(INPUT_COLLECTION, "users");

        let error = DocumentTarget::for_fetch(&config).unwrap_err();
        assert_eq!(error.to_string(), "Missing required input: document_id");
        assert_eq!(push_collection(&config).unwrap(), "users");
    }
}
