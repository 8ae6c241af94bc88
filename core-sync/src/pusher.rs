//! Send direction: local store out to the remote provider.

use bridge_traits::{LocalStore, ProviderKind, Transformer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::SyncConfiguration;
use crate::error::{Result, SyncError};
use crate::providers::{push_collection, ProviderRegistry, TabularTarget};
use crate::transform::apply_transform;

pub struct DataPusher {
    providers: ProviderRegistry,
    local_store: Arc<dyn LocalStore>,
    transformer: Option<Arc<dyn Transformer>>,
}

impl DataPusher {
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

    /// Read, transform and send. Returns the number of rows or records sent.
    #[instrument(skip(self, config), fields(config_id = %config.id))]
    pub async fn push(&self, config: &SyncConfiguration) -> Result<usize> {
        let kind = config.provider_kind()?;
        debug!(provider = %kind, inputs = %config.loggable_inputs(), "Pushing local data");
        // Inputs are checked before touching the store.
        let destination = match kind {
            ProviderKind::DocumentDatabase => Destination::Document(push_collection(config)?),
            ProviderKind::Tabular => Destination::Tabular(TabularTarget::for_push(config)?),
        };

        let data = self.read_local(config).await?;
        let data = apply_transform(self.transformer.as_ref(), config.transformer.as_ref(), data)
            .await?;

        let sent = match destination {
            Destination::Document(collection) => {
                self.send_documents(config, &collection, data).await?
            }
            Destination::Tabular(target) => self.send_rows(config, &target, data).await?,
        };

        info!(sent, provider = %kind, "Pushed local data for {}", config.storage_key);
        Ok(sent)
    }

    async fn read_local(&self, config: &SyncConfiguration) -> Result<Value> {
        let keys = if config.outputs.is_empty() {
            vec![config.storage_key.clone()]
        } else {
            config.output_keys()
        };

        let mut entries = self
            .local_store
            .get(&keys)
            .await
            .map_err(SyncError::local_store)?;

        let mut take = |key: &str, default: &Value| match entries.remove(key) {
            Some(value) if !value.is_null() => value,
            _ => default.clone(),
        };

        Ok(match config.outputs.as_slice() {
            [] => take(&config.storage_key, &Value::Null),
            [output] => take(&output.key, &output.default_value),
            outputs => {
                let mut object = Map::new();
                for output in outputs {
                    object.insert(output.key.clone(), take(&output.key, &output.default_value));
                }
                Value::Object(object)
            }
        })
    }

    async fn send_documents(
        &self,
        config: &SyncConfiguration,
        collection: &str,
        data: Value,
    ) -> Result<usize> {
        let records = normalize_documents(data);
        let provider = self.providers.document()?;
        provider.connect(&config.provider_inputs()).await?;

        for record in &records {
            let id = provider.create_record(collection, record.clone()).await?;
            debug!(collection, record_id = %id, "Created remote record");
        }
        Ok(records.len())
    }

    async fn send_rows(
        &self,
        config: &SyncConfiguration,
        target: &TabularTarget,
        data: Value,
    ) -> Result<usize> {
        let table = normalize_rows(data);
        if table.rows.is_empty() {
            debug!("Nothing to write for {}", config.storage_key);
            return Ok(0);
        }

        let provider = self.providers.tabular()?;
        provider.connect(&config.provider_inputs()).await?;
        provider
            .write_range(&target.spreadsheet_id, &target.range, table.rows)
            .await?;
        Ok(table.data_rows)
    }
}

enum Destination {
    Document(String),
    Tabular(TabularTarget),
}

/// Rows ready for `write_range`, plus how many of them carry data.
#[derive(Debug, PartialEq)]
pub(crate) struct Table {
    pub rows: Vec<Vec<Value>>,
    pub data_rows: usize,
}

pub(crate) fn normalize_rows(data: Value) -> Table {
    match data {
        Value::Null => Table {
            rows: Vec::new(),
            data_rows: 0,
        },
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let objects: Vec<Map<String, Value>> = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(object) => Some(object),
                    _ => None,
                })
                .collect();
            objects_to_table(objects)
        }
        Value::Array(items) => {
            let rows: Vec<Vec<Value>> = items
                .into_iter()
                .map(|item| match item {
                    Value::Array(cells) => cells,
                    other => vec![other],
                })
                .collect();
            Table {
                data_rows: rows.len(),
                rows,
            }
        }
        Value::Object(object) => objects_to_table(vec![object]),
        primitive => Table {
            rows: vec![vec![primitive]],
            data_rows: 1,
        },
    }
}

/// Header row of keys in first-seen order, then one row per object.
fn objects_to_table(objects: Vec<Map<String, Value>>) -> Table {
    let mut header: Vec<String> = Vec::new();
    for object in &objects {
        for key in object.keys() {
            if !header.contains(key) {
                header.push(key.clone());
            }
        }
    }

    let mut rows = Vec::with_capacity(objects.len() + 1);
    rows.push(header.iter().map(|k| Value::String(k.clone())).collect());
    for object in &objects {
        rows.push(
            header
                .iter()
                .map(|key| object.get(key).cloned().unwrap_or(Value::Null))
                .collect(),
        );
    }

    Table {
        data_rows: objects.len(),
        rows,
    }
}

pub(crate) fn normalize_documents(data: Value) -> Vec<Value> {
    let wrap = |value: Value| match value {
        Value::Object(_) => value,
        other => json!({ "value": other }),
    };

    match data {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(wrap).collect(),
        other => vec![wrap(other)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_of_objects_gets_header_in_first_seen_order() {
        let table = normalize_rows(json!([
            { "name": "Ada", "age": 36 },
            { "name": "Linus", "city": "Helsinki" }
        ]));

        assert_eq!(table.data_rows, 2);
        assert_eq!(
            table.rows,
            vec![
                vec![json!("name"), json!("age"), json!("city")],
                vec![json!("Ada"), json!(36), Value::Null],
                vec![json!("Linus"), Value::Null, json!("Helsinki")],
            ]
        );
    }

    #[test]
    fn test_single_object_is_header_plus_row() {
        let table = normalize_rows(json!({ "k": "v" }));
        assert_eq!(table.rows, vec![vec![json!("k")], vec![json!("v")]]);
        assert_eq!(table.data_rows, 1);
    }

    #[test]
    fn test_primitive_is_one_cell() {
        let table = normalize_rows(json!("hello"));
        assert_eq!(table.rows, vec![vec![json!("hello")]]);
        assert_eq!(table.data_rows, 1);
    }

    #[test]
    fn test_array_of_arrays_passes_through() {
        let rows = json!([["a", "b"], [1, 2]]);
        let table = normalize_rows(rows);
        assert_eq!(
            table.rows,
            vec![vec![json!("a"), json!("b")], vec![json!(1), json!(2)]]
        );
        assert_eq!(table.data_rows, 2);
    }

    #[test]
    fn test_array_of_primitives_is_one_cell_per_row() {
        let table = normalize_rows(json!([1, "two", true]));
        assert_eq!(
            table.rows,
            vec![vec![json!(1)], vec![json!("two")], vec![json!(true)]]
        );
    }

    #[test]
    fn test_null_and_empty_array_have_no_rows() {
        assert!(normalize_rows(Value::Null).rows.is_empty());
        assert!(normalize_rows(json!([])).rows.is_empty());
    }

    #[test]
    fn test_document_normalization() {
        assert_eq!(normalize_documents(json!({ "a": 1 })), vec![json!({ "a": 1 })]);
        assert_eq!(
            normalize_documents(json!([{ "a": 1 }, 2])),
            vec![json!({ "a": 1 }), json!({ "value": 2 })]
        );
        assert_eq!(normalize_documents(json!("x")), vec![json!({ "value": "x" })]);
        assert!(normalize_documents(Value::Null).is_empty());
    }
}
