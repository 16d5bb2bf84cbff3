//! Per-source reconciliation of a canonical table against a fresh fetch.
//!
//! The stored records of one source are full-outer-joined with the fetched
//! snapshot on `id`:
//! - fetched with data → mapped and written ACTIVE
//! - fetched without data, or not fetched at all → written INACTIVE with
//!   their stored fields untouched
//!
//! Records are never deleted. A fetch failure aborts the run before any
//! write, so a transient outage cannot flip a whole source to INACTIVE.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{MapError, ReconError};
use crate::evidence::compute_summary;
use crate::model::{
    CanonicalRecord, Fields, RecordFilter, RecordUpdate, ReconcileReport, RowOutcome,
    SkippedRow, SourceRecord, Status,
};
use crate::source::{Fetcher, Mapper};
use crate::store::RecordStore;

/// The (table, source) partition being reconciled and the canonical fields
/// the source may write.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileTarget<'a> {
    pub table: &'a str,
    pub source: &'a str,
    pub fields: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// When false, statuses are left alone: rows without data are not
    /// written and only new rows get a status (ACTIVE).
    pub manage_status: bool,
    pub typecast: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { manage_status: true, typecast: true }
    }
}

/// Reconcile one source into one table with default options.
pub fn reconcile<S, F, M>(
    store: &mut S,
    table: &str,
    source: &str,
    fields: &[String],
    fetcher: &mut F,
    mapper: &M,
) -> Result<ReconcileReport, ReconError>
where
    S: RecordStore + ?Sized,
    F: Fetcher + ?Sized,
    M: Mapper + ?Sized,
{
    let target = ReconcileTarget { table, source, fields };
    reconcile_with(store, &target, fetcher, mapper, ReconcileOptions::default())
}

pub fn reconcile_with<S, F, M>(
    store: &mut S,
    target: &ReconcileTarget<'_>,
    fetcher: &mut F,
    mapper: &M,
    options: ReconcileOptions,
) -> Result<ReconcileReport, ReconError>
where
    S: RecordStore + ?Sized,
    F: Fetcher + ?Sized,
    M: Mapper + ?Sized,
{
    let current: BTreeMap<String, CanonicalRecord> = store
        .list_records(target.table, &RecordFilter::by_source(target.source))?
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

    let fetched = fetcher.fetch().map_err(|e| {
        log::error!(
            "fetch failed for source '{}' (table '{}'): {e}; nothing written",
            target.source,
            target.table
        );
        ReconError::Fetch {
            source: target.source.to_string(),
            table: target.table.to_string(),
            message: e.message,
        }
    })?;
    let fetched_count = fetched.len();
    let fetched = index_fetched(target, fetched);

    let ids: BTreeSet<&String> = current.keys().chain(fetched.keys()).collect();
    let empty = Fields::new();

    let mut updates = Vec::new();
    let mut outcomes = Vec::with_capacity(ids.len());
    let mut skipped = Vec::new();

    for id in ids {
        let prior = current.get(id);
        let data = fetched
            .get(id)
            .filter(|r| r.has_data())
            .and_then(|r| r.data.as_ref());
        let prior_fields = prior.map_or(&empty, |p| &p.fields);

        match plan_row(id, prior, data, prior_fields, target, mapper, options) {
            Ok((update, outcome)) => {
                log::debug!("{}/{}: '{id}' {outcome}", target.table, target.source);
                if let Some(update) = update {
                    updates.push(update);
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                log::warn!(
                    "skipping record '{id}' of source '{}' in table '{}': {e}",
                    target.source,
                    target.table
                );
                skipped.push(SkippedRow { id: id.clone(), reason: e.to_string() });
                outcomes.push(RowOutcome::Skipped);
            }
        }
    }

    if !updates.is_empty() {
        store.upsert(target.table, updates, options.typecast)?;
    }

    let summary = compute_summary(&outcomes, current.len(), fetched_count);
    log::info!(
        "reconciled '{}' from source '{}': {} current, {} fetched, {} active, {} inactive, {} skipped",
        target.table,
        target.source,
        summary.current,
        summary.fetched,
        summary.active,
        summary.inactive,
        skipped.len(),
    );

    Ok(ReconcileReport {
        table: target.table.to_string(),
        source: target.source.to_string(),
        run_at: chrono::Utc::now().to_rfc3339(),
        summary,
        skipped,
    })
}

/// Key fetched records by id. Later duplicates replace earlier ones.
fn index_fetched(
    target: &ReconcileTarget<'_>,
    fetched: Vec<SourceRecord>,
) -> BTreeMap<String, SourceRecord> {
    let mut index = BTreeMap::new();
    for record in fetched {
        if record.id.is_empty() {
            log::warn!(
                "source '{}' returned a record without an id for table '{}'; ignored",
                target.source,
                target.table
            );
            continue;
        }
        if let Some(previous) = index.insert(record.id.clone(), record) {
            log::warn!(
                "source '{}' returned id '{}' more than once; keeping the last one",
                target.source,
                previous.id
            );
        }
    }
    index
}

fn plan_row<M: Mapper + ?Sized>(
    id: &str,
    prior: Option<&CanonicalRecord>,
    data: Option<&Value>,
    prior_fields: &Fields,
    target: &ReconcileTarget<'_>,
    mapper: &M,
    options: ReconcileOptions,
) -> Result<(Option<RecordUpdate>, RowOutcome), MapError> {
    let fields = match data {
        Some(data) => mapper
            .map(data, prior_fields)?
            .into_iter()
            .filter(|(name, _)| target.fields.contains(name))
            .collect(),
        None => Fields::new(),
    };
    let active = data.is_some();

    if !options.manage_status {
        if !active {
            return Ok((None, RowOutcome::Untouched));
        }
        let (status, outcome) = match prior {
            None => (Some(Status::Active), RowOutcome::Created),
            Some(_) => (None, RowOutcome::Refreshed),
        };
        let update = RecordUpdate {
            id: id.to_string(),
            source: Some(target.source.to_string()),
            status,
            fields,
        };
        return Ok((Some(update), outcome));
    }

    let outcome = match (prior.map(|p| p.status), active) {
        (None, true) => RowOutcome::Created,
        (None, false) => RowOutcome::StillInactive,
        (Some(Status::Active), true) => RowOutcome::Refreshed,
        (Some(Status::Inactive), true) => RowOutcome::Reactivated,
        (Some(Status::Active), false) => RowOutcome::Deactivated,
        (Some(Status::Inactive), false) => RowOutcome::StillInactive,
    };
    let update = RecordUpdate {
        id: id.to_string(),
        source: Some(target.source.to_string()),
        status: Some(if active { Status::Active } else { Status::Inactive }),
        fields,
    };
    Ok((Some(update), outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::source::FieldCopyMapper;
    use crate::store::MemoryStore;
    use serde_json::json;

    const TABLE: &str = "Organizations";

    fn fields() -> Vec<String> {
        vec!["name".into(), "urls".into()]
    }

    fn run(store: &mut MemoryStore, source: &str, batch: Vec<SourceRecord>) -> ReconcileReport {
        let mut fetch = move || -> Result<Vec<SourceRecord>, FetchError> { Ok(batch.clone()) };
        reconcile(store, TABLE, source, &fields(), &mut fetch, &FieldCopyMapper).unwrap()
    }

    fn org(id: &str, name: &str) -> SourceRecord {
        SourceRecord::new(id, json!({"name": name}))
    }

    #[test]
    fn new_records_are_created_active() {
        let mut store = MemoryStore::new();
        let report = run(&mut store, "meser", vec![org("meser:1", "A"), org("meser:2", "B")]);
        assert_eq!(report.count(RowOutcome::Created), 2);
        let rec = store.get(TABLE, "meser:1").unwrap();
        assert_eq!(rec.status, Status::Active);
        assert_eq!(rec.source, "meser");
        assert_eq!(rec.field_str("name"), Some("A"));
    }

    #[test]
    fn missing_records_become_inactive_and_keep_fields() {
        let mut store = MemoryStore::new();
        run(&mut store, "meser", vec![org("meser:1", "A"), org("meser:2", "B")]);
        let report = run(&mut store, "meser", vec![org("meser:1", "A")]);

        assert_eq!(report.count(RowOutcome::Deactivated), 1);
        assert_eq!(report.count(RowOutcome::Refreshed), 1);
        let gone = store.get(TABLE, "meser:2").unwrap();
        assert_eq!(gone.status, Status::Inactive);
        assert_eq!(gone.field_str("name"), Some("B"));
    }

    #[test]
    fn empty_payload_counts_as_absent() {
        let mut store = MemoryStore::new();
        run(&mut store, "meser", vec![org("meser:1", "A")]);
        run(&mut store, "meser", vec![SourceRecord::new("meser:1", json!({}))]);
        assert_eq!(store.get(TABLE, "meser:1").unwrap().status, Status::Inactive);
        assert_eq!(store.get(TABLE, "meser:1").unwrap().field_str("name"), Some("A"));
    }

    #[test]
    fn inactive_records_flip_back() {
        let mut store = MemoryStore::new();
        run(&mut store, "meser", vec![org("meser:1", "A")]);
        let key = store.get(TABLE, "meser:1").unwrap().internal_key.clone();
        run(&mut store, "meser", vec![]);
        let report = run(&mut store, "meser", vec![org("meser:1", "A2")]);

        assert_eq!(report.count(RowOutcome::Reactivated), 1);
        let rec = store.get(TABLE, "meser:1").unwrap();
        assert_eq!(rec.status, Status::Active);
        assert_eq!(rec.internal_key, key);
        assert_eq!(rec.field_str("name"), Some("A2"));
    }

    #[test]
    fn other_sources_are_not_touched() {
        let mut store = MemoryStore::new();
        run(&mut store, "guidestar", vec![org("guidestar:9", "G")]);
        run(&mut store, "meser", vec![org("meser:1", "A")]);
        run(&mut store, "meser", vec![]);
        assert_eq!(store.get(TABLE, "guidestar:9").unwrap().status, Status::Active);
    }

    #[test]
    fn fields_outside_the_list_are_dropped() {
        let mut store = MemoryStore::new();
        run(
            &mut store,
            "meser",
            vec![SourceRecord::new("meser:1", json!({"name": "A", "secret": "x"}))],
        );
        assert!(!store.get(TABLE, "meser:1").unwrap().fields.contains_key("secret"));
    }

    #[test]
    fn map_errors_skip_only_that_row() {
        let mut store = MemoryStore::new();
        run(&mut store, "meser", vec![org("meser:1", "A"), org("meser:2", "B")]);

        let mapper = |data: &Value, _: &Fields| -> Result<Fields, MapError> {
            if data["name"] == "bad" {
                return Err(MapError::MissingField("name".into()));
            }
            FieldCopyMapper.map(data, &Fields::new())
        };
        let mut fetch = || -> Result<Vec<SourceRecord>, FetchError> {
            Ok(vec![org("meser:1", "bad"), org("meser:2", "B2"), org("meser:3", "C")])
        };
        let report = reconcile(&mut store, TABLE, "meser", &fields(), &mut fetch, &mapper).unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, "meser:1");
        // skipped row keeps its prior state
        assert_eq!(store.get(TABLE, "meser:1").unwrap().field_str("name"), Some("A"));
        assert_eq!(store.get(TABLE, "meser:1").unwrap().status, Status::Active);
        assert_eq!(store.get(TABLE, "meser:2").unwrap().field_str("name"), Some("B2"));
        assert!(store.get(TABLE, "meser:3").is_some());
    }

    #[test]
    fn fetch_failure_writes_nothing() {
        let mut store = MemoryStore::new();
        run(&mut store, "meser", vec![org("meser:1", "A")]);
        let before = store.snapshot(TABLE);

        let mut fetch =
            || -> Result<Vec<SourceRecord>, FetchError> { Err(FetchError::new("connection reset")) };
        let err = reconcile(&mut store, TABLE, "meser", &fields(), &mut fetch, &FieldCopyMapper)
            .unwrap_err();

        assert!(matches!(err, ReconError::Fetch { ref source, .. } if source == "meser"));
        assert_eq!(store.snapshot(TABLE), before);
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let mut store = MemoryStore::new();
        let report = run(&mut store, "meser", vec![org("meser:1", "A"), org("meser:1", "B")]);
        assert_eq!(report.summary.fetched, 2);
        assert_eq!(store.len(TABLE), 1);
        assert_eq!(store.get(TABLE, "meser:1").unwrap().field_str("name"), Some("B"));
    }

    #[test]
    fn unmanaged_status_leaves_existing_rows_alone() {
        let mut store = MemoryStore::new();
        run(&mut store, "entities", vec![org("entities:1", "A"), org("entities:2", "B")]);
        run(&mut store, "entities", vec![org("entities:1", "A")]);
        assert_eq!(store.get(TABLE, "entities:2").unwrap().status, Status::Inactive);

        let f = fields();
        let target = ReconcileTarget { table: TABLE, source: "entities", fields: &f };
        let options = ReconcileOptions { manage_status: false, typecast: true };
        let mut fetch = || -> Result<Vec<SourceRecord>, FetchError> {
            Ok(vec![org("entities:2", "B2"), org("entities:3", "C")])
        };
        let report =
            reconcile_with(&mut store, &target, &mut fetch, &FieldCopyMapper, options).unwrap();

        assert_eq!(report.count(RowOutcome::Untouched), 1);
        // entities:1 missing from the fetch but stays ACTIVE
        assert_eq!(store.get(TABLE, "entities:1").unwrap().status, Status::Active);
        // entities:2 refreshed without reactivation
        let two = store.get(TABLE, "entities:2").unwrap();
        assert_eq!(two.status, Status::Inactive);
        assert_eq!(two.field_str("name"), Some("B2"));
        assert_eq!(store.get(TABLE, "entities:3").unwrap().status, Status::Active);
    }
}
