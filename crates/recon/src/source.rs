//! Fetch and map collaborators.
//!
//! A fetcher produces the full snapshot of one external source; a mapper
//! turns one fetched payload into canonical fields. Both are traits with
//! blanket impls for closures so callers can pass either.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::SourceConfig;
use crate::error::{FetchError, MapError};
use crate::model::{Fields, SourceRecord};

pub trait Fetcher {
    fn fetch(&mut self) -> Result<Vec<SourceRecord>, FetchError>;
}

impl<F> Fetcher for F
where
    F: FnMut() -> Result<Vec<SourceRecord>, FetchError>,
{
    fn fetch(&mut self) -> Result<Vec<SourceRecord>, FetchError> {
        self()
    }
}

pub trait Mapper {
    /// Map a fetched payload onto canonical fields. `current` holds the
    /// stored fields of the record, empty for new records.
    fn map(&self, data: &Value, current: &Fields) -> Result<Fields, MapError>;
}

impl<F> Mapper for F
where
    F: Fn(&Value, &Fields) -> Result<Fields, MapError>,
{
    fn map(&self, data: &Value, current: &Fields) -> Result<Fields, MapError> {
        self(data, current)
    }
}

/// Copies every key of an object payload verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldCopyMapper;

impl Mapper for FieldCopyMapper {
    fn map(&self, data: &Value, _current: &Fields) -> Result<Fields, MapError> {
        match data {
            Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            _ => Err(MapError::NotAnObject),
        }
    }
}

/// Config-driven mapper: renames raw columns to canonical fields.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapper {
    /// canonical field -> raw column
    pub columns: BTreeMap<String, String>,
    /// Canonical fields whose raw value is a newline-separated list.
    pub list_fields: Vec<String>,
    /// Canonical fields that must be non-empty.
    pub required: Vec<String>,
    /// Canonical fields where a non-empty stored value wins over the fetch.
    pub prefer_existing: Vec<String>,
}

impl ColumnMapper {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            columns: config.columns.clone(),
            list_fields: config.list_fields.clone(),
            required: config.required.clone(),
            prefer_existing: config.prefer_existing.clone(),
        }
    }
}

impl Mapper for ColumnMapper {
    fn map(&self, data: &Value, current: &Fields) -> Result<Fields, MapError> {
        let Value::Object(raw) = data else {
            return Err(MapError::NotAnObject);
        };

        let mut fields = Fields::new();
        for (field, column) in &self.columns {
            let value = raw.get(column).cloned().unwrap_or(Value::Null);
            let value = if self.list_fields.contains(field) {
                split_list(field, value)?
            } else {
                value
            };

            if self.prefer_existing.contains(field) {
                if let Some(existing) = current.get(field).filter(|v| crate::model::is_truthy(v)) {
                    fields.insert(field.clone(), existing.clone());
                    continue;
                }
            }
            fields.insert(field.clone(), value);
        }

        for field in &self.required {
            if !fields.get(field).is_some_and(crate::model::is_truthy) {
                return Err(MapError::MissingField(field.clone()));
            }
        }

        Ok(fields)
    }
}

fn split_list(field: &str, value: Value) -> Result<Value, MapError> {
    match value {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(items) => Ok(Value::Array(items)),
        Value::String(s) => Ok(Value::Array(
            s.split('\n')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.to_string()))
                .collect(),
        )),
        other => Err(MapError::InvalidField {
            field: field.to_string(),
            message: format!("expected a list or newline-separated string, got {other}"),
        }),
    }
}

/// Stable id for sources that have no native ids: `<source>:<hash>`, where
/// the hash covers the payload with object keys sorted.
pub fn content_id(source: &str, data: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(data).to_string().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{source}:{hex}")
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
