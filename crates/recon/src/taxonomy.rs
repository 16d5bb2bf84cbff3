//! Taxonomy tags: ancestor closure and source-category mapping.
//!
//! Tags are colon-delimited paths (`domain:category:leaf`). The closure of a
//! tag set adds every ancestor path so that faceting on a parent category
//! counts records tagged with any of its descendants.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Value};

use crate::error::StoreError;
use crate::model::{CanonicalRecord, Fields, RecordFilter, RecordUpdate};
use crate::store::RecordStore;

/// Expand tags with all their ancestor paths.
///
/// `a:b:c` yields `a`, `a:b` and `a:b:c`. Ancestors ending in an empty
/// segment (`a::b` → `a:`) are not emitted; empty tags are ignored.
pub fn close<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut closed = BTreeSet::new();
    for tag in tags {
        let tag = tag.as_ref();
        if tag.is_empty() {
            continue;
        }
        let mut end = 0;
        for segment in tag.split(':') {
            end += segment.len();
            if !segment.is_empty() {
                closed.insert(tag[..end].to_string());
            }
            end += 1;
        }
        closed.insert(tag.to_string());
    }
    closed
}

// ---------------------------------------------------------------------------
// Source category mapping
// ---------------------------------------------------------------------------

pub const NAME_FIELD: &str = "name";
pub const RESPONSE_IDS_FIELD: &str = "response_ids";
pub const SITUATION_IDS_FIELD: &str = "situation_ids";

/// Response and situation tags a source category name stands for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxonomyEntry {
    pub response_ids: Vec<String>,
    pub situation_ids: Vec<String>,
}

/// Free-text category names used by a source, mapped to taxonomy tags.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyMapping {
    entries: HashMap<String, TaxonomyEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub responses: BTreeSet<String>,
    pub situations: BTreeSet<String>,
    /// Names with no mapping entry.
    pub unknown: BTreeSet<String>,
}

impl Resolution {
    /// Responses and situations with their ancestors added.
    pub fn closed(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        (close(&self.responses), close(&self.situations))
    }
}

impl TaxonomyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: TaxonomyEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from mapping-table records. The category name is the `name`
    /// field, falling back to the record id.
    pub fn from_records(records: &[CanonicalRecord]) -> Self {
        let mut mapping = Self::new();
        for record in records {
            let name = record.field_str(NAME_FIELD).unwrap_or(&record.id);
            let entry = TaxonomyEntry {
                response_ids: string_items(record.fields.get(RESPONSE_IDS_FIELD)),
                situation_ids: string_items(record.fields.get(SITUATION_IDS_FIELD)),
            };
            mapping.insert(name, entry);
        }
        mapping
    }

    pub fn load<S: RecordStore + ?Sized>(store: &S, table: &str) -> Result<Self, StoreError> {
        let records = store.list_records(table, &RecordFilter::all())?;
        Ok(Self::from_records(&records))
    }

    /// Resolve category names into tag sets. Unknown names are logged and
    /// collected; they contribute nothing to the sets.
    pub fn resolve<I, S>(&self, names: I) -> Resolution
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolution = Resolution::default();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            match self.entries.get(name) {
                Some(entry) => {
                    resolution.responses.extend(entry.response_ids.iter().cloned());
                    resolution.situations.extend(entry.situation_ids.iter().cloned());
                }
                None => {
                    if resolution.unknown.insert(name.to_string()) {
                        log::warn!("no taxonomy mapping for '{name}'");
                    }
                }
            }
        }
        resolution
    }
}

fn string_items(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Record unknown category names in the mapping table so they can be
/// curated by hand. Existing rows are left as they are.
pub fn register_unknown<S: RecordStore + ?Sized>(
    store: &mut S,
    table: &str,
    unknown: &BTreeSet<String>,
) -> Result<usize, StoreError> {
    let known: BTreeSet<String> = store
        .list_records(table, &RecordFilter::all())?
        .into_iter()
        .map(|r| r.id)
        .collect();

    let updates: Vec<RecordUpdate> = unknown
        .iter()
        .filter(|name| !known.contains(*name))
        .map(|name| {
            let mut fields = Fields::new();
            fields.insert(NAME_FIELD.into(), json!(name));
            RecordUpdate::fields_only(name.clone(), fields)
        })
        .collect();

    let count = updates.len();
    if count > 0 {
        store.upsert(table, updates, true)?;
        log::info!("registered {count} unmapped taxonomy names in '{table}'");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn closure_of_single_tag() {
        assert_eq!(close(["a:b:c"]), set(&["a", "a:b", "a:b:c"]));
    }

    #[test]
    fn closure_dedups_shared_ancestors() {
        assert_eq!(close(["a:b:c", "a:b:d"]), set(&["a", "a:b", "a:b:c", "a:b:d"]));
    }

    #[test]
    fn closure_of_nothing_is_empty() {
        assert!(close(Vec::<String>::new()).is_empty());
        assert!(close([""]).is_empty());
    }

    #[test]
    fn closure_skips_empty_segments() {
        assert_eq!(close(["a::b"]), set(&["a", "a::b"]));
        assert_eq!(close(["root"]), set(&["root"]));
    }

    #[test]
    fn closure_is_idempotent() {
        let once = close(["human_services:health:mental_health"]);
        assert_eq!(close(&once), once);
    }

    fn mapping() -> TaxonomyMapping {
        let mut mapping = TaxonomyMapping::new();
        mapping.insert(
            "Mental health",
            TaxonomyEntry {
                response_ids: vec!["human_services:health:mental_health".into()],
                situation_ids: vec!["human_situations:disability".into()],
            },
        );
        mapping.insert(
            "Youth",
            TaxonomyEntry {
                response_ids: vec![],
                situation_ids: vec!["human_situations:age_group:youth".into()],
            },
        );
        mapping
    }

    #[test]
    fn resolve_collects_tags_and_unknowns() {
        let res = mapping().resolve(["Mental health", " Youth ", "", "Gardening", "Gardening"]);
        assert_eq!(res.responses, set(&["human_services:health:mental_health"]));
        assert_eq!(
            res.situations,
            set(&["human_situations:disability", "human_situations:age_group:youth"])
        );
        assert_eq!(res.unknown, set(&["Gardening"]));

        let (responses, _) = res.closed();
        assert!(responses.contains("human_services"));
        assert!(responses.contains("human_services:health"));
    }

    #[test]
    fn load_from_records_and_register_unknown() {
        let mut store = MemoryStore::new();
        let mut fields = Fields::new();
        fields.insert(NAME_FIELD.into(), json!("Youth"));
        fields.insert(SITUATION_IDS_FIELD.into(), json!(["human_situations:age_group:youth"]));
        store.upsert("TaxonomyMapping", vec![RecordUpdate::fields_only("Youth", fields)], true).unwrap();

        let mapping = TaxonomyMapping::load(&store, "TaxonomyMapping").unwrap();
        assert_eq!(mapping.len(), 1);
        let res = mapping.resolve(["Youth", "Elderly"]);
        assert_eq!(res.situations.len(), 1);

        let added = register_unknown(&mut store, "TaxonomyMapping", &res.unknown).unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.get("TaxonomyMapping", "Elderly").unwrap().field_str("name"), Some("Elderly"));

        // second registration is a no-op
        assert_eq!(register_unknown(&mut store, "TaxonomyMapping", &res.unknown).unwrap(), 0);
    }
}
