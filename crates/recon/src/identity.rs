//! Curation-key to production-identity mapping for one entity kind.
//!
//! A mapping lives for exactly one promotion run. It is filled while records
//! are admitted (curation key → production `id`), then rebuilt from the
//! production table after commit so every entry also carries the production
//! `internal_key` that downstream references must point at.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::StoreError;
use crate::model::{EntityKind, RecordFilter};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionIdentity {
    pub id: String,
    /// Known only after `rebuild`.
    pub internal_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityMapping {
    kind: EntityKind,
    entries: BTreeMap<String, ProductionIdentity>,
}

impl IdentityMapping {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind, entries: BTreeMap::new() }
    }

    /// Register an admitted record under its curation-base key.
    pub fn register(&mut self, curation_key: impl Into<String>, id: impl Into<String>) {
        self.entries.insert(
            curation_key.into(),
            ProductionIdentity { id: id.into(), internal_key: None },
        );
    }

    pub fn get(&self, curation_key: &str) -> Option<&ProductionIdentity> {
        self.entries.get(curation_key)
    }

    /// Production key a reference to `curation_key` must be rewritten to.
    pub fn resolve(&self, curation_key: &str) -> Option<&str> {
        self.entries.get(curation_key).and_then(|p| p.internal_key.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Production `id`s of every registered record.
    pub fn ids(&self) -> BTreeSet<String> {
        self.entries.values().map(|p| p.id.clone()).collect()
    }

    /// Re-read the production table and attach each entry's production
    /// `internal_key`. Entries whose id is not in production are dropped.
    pub fn rebuild<S: RecordStore + ?Sized>(
        self,
        production: &S,
        table: &str,
    ) -> Result<Self, StoreError> {
        let keys: HashMap<String, String> = production
            .list_records(table, &RecordFilter::all())?
            .into_iter()
            .map(|r| (r.id, r.internal_key))
            .collect();

        let mut entries = BTreeMap::new();
        for (curation_key, identity) in self.entries {
            match keys.get(&identity.id) {
                Some(key) => {
                    entries.insert(
                        curation_key,
                        ProductionIdentity { id: identity.id, internal_key: Some(key.clone()) },
                    );
                }
                None => log::warn!(
                    "{} '{}' (curation key '{curation_key}') not found in production table '{table}'",
                    self.kind,
                    identity.id
                ),
            }
        }
        Ok(Self { kind: self.kind, entries })
    }

    /// Rewrite a list of curation keys to production keys. Keys with no
    /// resolved mapping are dropped; order is preserved.
    pub fn rewrite(&self, curation_keys: &[String]) -> Vec<String> {
        curation_keys
            .iter()
            .filter_map(|k| self.resolve(k).map(str::to_string))
            .collect()
    }
}
