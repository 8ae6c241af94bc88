//! Receive direction: remote provider into the local store.

use bridge_traits::{LocalStore, ProviderKind, StoreEntries, Transformer};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::SyncConfiguration;
use crate::error::{Result, SyncError};
use crate::providers::{DocumentTarget, ProviderRegistry, TabularTarget};
use crate::transform::apply_transform;

/// Remote data plus the number of records it represents.
struct Fetched {
    data: Value,
    count: usize,
}

pub struct DataFetcher {
    providers: ProviderRegistry,
    local_store: Arc<dyn LocalStore>,
    transformer: Option<Arc<dyn Transformer>>,
}

impl DataFetcher {
    pub fn new(providers: ProviderRegistry, local_store: Arc<dyn LocalStore>) -> Self {
        Self {
            providers,
            local_store,
            transformer: None,
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Fetch, transform and store. Returns the number of records received.
    #[instrument(skip(self, config), fields(config_id = %config.id))]
    pub async fn fetch(&self, config: &SyncConfiguration) -> Result<usize> {
        let kind = config.provider_kind()?;
        debug!(provider = %kind, inputs = %config.loggable_inputs(), "Fetching remote data");
        let fetched = match kind {
            ProviderKind::DocumentDatabase => self.fetch_document(config).await?,
            ProviderKind::Tabular => self.fetch_tabular(config).await?,
        };
        debug!(provider = %kind, count = fetched.count, "Remote data fetched");

        let data = apply_transform(
            self.transformer.as_ref(),
            config.transformer.as_ref(),
            fetched.data,
        )
        .await?;

        let entries = map_outputs(config, &data);
        let keys = entries.len();
        self.local_store
            .set(entries)
            .await
            .map_err(SyncError::local_store)?;

        info!(
            records = fetched.count,
            keys, "Stored fetched data for {}", config.storage_key
        );
        Ok(fetched.count)
    }

    async fn fetch_document(&self, config: &SyncConfiguration) -> Result<Fetched> {
        let target = DocumentTarget::for_fetch(config)?;
        let provider = self.providers.document()?;

        provider.connect(&config.provider_inputs()).await?;
        let document = provider
            .query_by_id(&target.collection, &target.document_id)
            .await?;

        Ok(match document {
            None => {
                debug!(
                    collection = %target.collection,
                    document_id = %target.document_id,
                    "Document not found, writing defaults"
                );
                Fetched {
                    data: Value::Null,
                    count: 0,
                }
            }
            Some(Value::Array(items)) => Fetched {
                count: items.len(),
                data: Value::Array(items),
            },
            Some(value) => Fetched {
                data: value,
                count: 1,
            },
        })
    }

    async fn fetch_tabular(&self, config: &SyncConfiguration) -> Result<Fetched> {
        let target = TabularTarget::for_fetch(config)?;
        let provider = self.providers.tabular()?;

        provider.connect(&config.provider_inputs()).await?;
        let rows = provider
            .get_range(&target.spreadsheet_id, &target.range)
            .await?;

        let records = rows_to_objects(rows);
        Ok(Fetched {
            count: records.len(),
            data: Value::Array(records),
        })
    }
}

/// First row is the header; every following row becomes an object keyed by
/// it. Missing trailing cells read as empty strings.
pub(crate) fn rows_to_objects(rows: Vec<Vec<Value>>) -> Vec<Value> {
    let mut rows = rows.into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let header: Vec<String> = header.iter().map(cell_text).collect();

    rows.map(|row| {
        let mut object = Map::new();
        for (index, column) in header.iter().enumerate() {
            let cell = row
                .get(index)
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
            object.insert(column.clone(), cell);
        }
        Value::Object(object)
    })
    .collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Local store entries for fetched data.
pub(crate) fn map_outputs(config: &SyncConfiguration, data: &Value) -> StoreEntries {
    let mut entries = StoreEntries::new();

    if config.outputs.is_empty() {
        entries.insert(config.storage_key.clone(), data.clone());
        return entries;
    }

    match data {
        Value::Object(object) => {
            for output in &config.outputs {
                let value = match object.get(&output.key) {
                    Some(value) if !value.is_null() => value.clone(),
                    _ => output.default_value.clone(),
                };
                entries.insert(output.key.clone(), value);
            }
        }
        _ if config.outputs.len() == 1 => {
            let output = &config.outputs[0];
            let value = if data.is_null() {
                output.default_value.clone()
            } else {
                data.clone()
            };
            entries.insert(output.key.clone(), value);
        }
        _ => {
            for output in &config.outputs {
                entries.insert(output.key.clone(), output.default_value.clone());
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncDirection;
    use serde_json::json;

    fn config() -> SyncConfiguration {
        SyncConfiguration::new("cfg", "profile", "firestore", SyncDirection::ReceiveOnly)
    }

    #[test]
    fn test_no_outputs_stores_everything_under_storage_key() {
        let entries = map_outputs(&config(), &json!({ "a": 1 }));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["profile"], json!({ "a": 1 }));
    }

    #[test]
    fn test_object_fields_map_to_outputs_with_defaults() {
        let config = config()
            .with_output("name", json!("anonymous"))
            .with_output("age", json!(0))
            .with_output("email", Value::Null);

        let entries = map_outputs(&config, &json!({ "name": "Ada", "age": null }));
        assert_eq!(entries["name"], json!("Ada"));
        assert_eq!(entries["age"], json!(0));
        assert_eq!(entries["email"], Value::Null);
    }

    #[test]
    fn test_single_output_takes_non_object_data() {
        let config = config().with_output("rows", json!([]));
        let entries = map_outputs(&config, &json!([1, 2, 3]));
        assert_eq!(entries["rows"], json!([1, 2, 3]));

        let entries = map_outputs(&config, &Value::Null);
        assert_eq!(entries["rows"], json!([]));
    }

    #[test]
    fn test_several_outputs_with_non_object_data_use_defaults() {
        let config = config()
            .with_output("a", json!("x"))
            .with_output("b", json!("y"));
        let entries = map_outputs(&config, &json!(42));
        assert_eq!(entries["a"], json!("x"));
        assert_eq!(entries["b"], json!("y"));
    }

    #[test]
    fn test_rows_to_objects_uses_header() {
        let rows = vec![
            vec![json!("name"), json!("age")],
            vec![json!("Ada"), json!(36)],
            vec![json!("Linus")],
        ];

        assert_eq!(
            rows_to_objects(rows),
            vec![
                json!({ "name": "Ada", "age": 36 }),
                json!({ "name": "Linus", "age": "" }),
            ]
        );
    }

    #[test]
    fn test_rows_to_objects_empty_and_header_only() {
        assert!(rows_to_objects(Vec::new()).is_empty());
        assert!(rows_to_objects(vec![vec![json!("h")]]).is_empty());
    }
}
