//! Record store seam and the in-memory implementation.
//!
//! A store holds named tables of `CanonicalRecord`s keyed by `id`. Writes are
//! field-append upserts: a record's `internal_key` is assigned on first
//! insert and never changes afterwards.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::StoreError;
use crate::model::{CanonicalRecord, Fields, RecordFilter, RecordUpdate, Status};

pub trait RecordStore {
    fn list_records(
        &self,
        table: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<CanonicalRecord>, StoreError>;

    /// Upsert by `id`. Either the whole batch is applied or none of it.
    fn upsert(
        &mut self,
        table: &str,
        records: Vec<RecordUpdate>,
        typecast: bool,
    ) -> Result<UpsertOutcome, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: usize,
    pub updated: usize,
}

/// Format the `n`th internal key a store hands out.
pub fn internal_key(n: u64) -> String {
    format!("rec{n:014}")
}

/// Merge `update` into `stored`, applying typecast rules per field.
///
/// Returns the name of the first field whose type could not be reconciled.
pub fn merge_fields(stored: &mut Fields, update: &Fields, typecast: bool) -> Result<(), String> {
    for (name, value) in update {
        let value = match stored.get(name) {
            Some(old) => coerce(old, value, typecast).ok_or_else(|| name.clone())?,
            None => value.clone(),
        };
        stored.insert(name.clone(), value);
    }
    Ok(())
}

fn coerce(old: &Value, new: &Value, typecast: bool) -> Option<Value> {
    if old.is_null() || new.is_null() || same_shape(old, new) {
        return Some(new.clone());
    }
    if !typecast {
        return None;
    }
    let coerced = match (old, new) {
        (Value::Array(_), scalar) => Value::Array(vec![scalar.clone()]),
        (Value::String(_), Value::Number(n)) => Value::String(n.to_string()),
        (Value::String(_), Value::Bool(b)) => Value::String(b.to_string()),
        _ => new.clone(),
    };
    Some(coerced)
}

fn same_shape(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Apply one update to the stored record with its id, or to a new record
/// keyed from `next_key` when there is none. Shared by every store so
/// key allocation and merge rules stay identical.
pub fn apply_update(
    table: &str,
    existing: Option<CanonicalRecord>,
    update: RecordUpdate,
    typecast: bool,
    next_key: &mut u64,
) -> Result<CanonicalRecord, StoreError> {
    let mut record = existing.unwrap_or_else(|| {
        *next_key += 1;
        CanonicalRecord {
            id: update.id.clone(),
            internal_key: internal_key(*next_key),
            source: String::new(),
            status: Status::Active,
            fields: Fields::new(),
        }
    });
    if let Some(source) = update.source {
        record.source = source;
    }
    if let Some(status) = update.status {
        record.status = status;
    }
    merge_fields(&mut record.fields, &update.fields, typecast).map_err(|field| {
        StoreError::TypeMismatch { table: table.to_string(), id: update.id, field }
    })?;
    Ok(record)
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Ordered in-memory store. Used for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, BTreeMap<String, CanonicalRecord>>,
    next_key: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, id: &str) -> Option<&CanonicalRecord> {
        self.tables.get(table).and_then(|t| t.get(id))
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Serialized state of one table, ordered by id.
    pub fn snapshot(&self, table: &str) -> String {
        let records: Vec<&CanonicalRecord> = self
            .tables
            .get(table)
            .map(|t| t.values().collect())
            .unwrap_or_default();
        serde_json::to_string_pretty(&records).unwrap_or_default()
    }
}

impl RecordStore for MemoryStore {
    fn list_records(
        &self,
        table: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<CanonicalRecord>, StoreError> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    fn upsert(
        &mut self,
        table: &str,
        records: Vec<RecordUpdate>,
        typecast: bool,
    ) -> Result<UpsertOutcome, StoreError> {
        // Work on a copy so a failing batch leaves the table untouched.
        let mut staged = self.tables.get(table).cloned().unwrap_or_default();
        let mut next_key = self.next_key;
        let mut outcome = UpsertOutcome::default();

        for update in records {
            let existing = staged.remove(&update.id);
            if existing.is_some() {
                outcome.updated += 1;
            } else {
                outcome.created += 1;
            }
            let record = apply_update(table, existing, update, typecast, &mut next_key)?;
            staged.insert(record.id.clone(), record);
        }

        self.tables.insert(table.to_string(), staged);
        self.next_key = next_key;
        Ok(outcome)
    }
}
