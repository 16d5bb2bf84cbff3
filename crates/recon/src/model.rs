use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table-specific attributes of a record, ordered by field name so that
/// serialized snapshots are stable across runs.
pub type Fields = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Status + Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Active,
    Inactive,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Curation decision assigned by a reviewer in a curation base.
///
/// Only `Rejected` and `Suspended` keep a record out of production. Any
/// other value, including ones this crate does not know about, admits it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Decision {
    New,
    Rejected,
    Suspended,
    Other(String),
}

impl Decision {
    pub fn parse(s: &str) -> Self {
        match s {
            "New" => Self::New,
            "Rejected" => Self::Rejected,
            "Suspended" => Self::Suspended,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "New",
            Self::Rejected => "Rejected",
            Self::Suspended => "Suspended",
            Self::Other(s) => s,
        }
    }

    pub fn admits(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Suspended)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field holding the curation decision in curation-base tables.
pub const DECISION_FIELD: &str = "decision";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of a canonical (or curation) table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: String,
    pub internal_key: String,
    pub source: String,
    pub status: Status,
    #[serde(default)]
    pub fields: Fields,
}

impl CanonicalRecord {
    /// The curation decision, if one has been assigned. Empty strings count
    /// as unassigned.
    pub fn decision(&self) -> Option<Decision> {
        match self.fields.get(DECISION_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => Some(Decision::parse(s)),
            _ => None,
        }
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// One entry of a fetched snapshot. `data` is whatever the source produced
/// for this id; an absent or empty payload marks the record as gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl SourceRecord {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), data: Some(data) }
    }

    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(is_truthy)
    }
}

/// Truthiness of a JSON payload: null, false, zero, and empty
/// strings/lists/objects are all "no data".
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A field-append write against a record store. Only the keys present in
/// `fields` are written; `source` and `status` are written only when set.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub source: Option<String>,
    pub status: Option<Status>,
    pub fields: Fields,
}

impl RecordUpdate {
    pub fn fields_only(id: impl Into<String>, fields: Fields) -> Self {
        Self { id: id.into(), source: None, status: None, fields }
    }
}

/// Filter for `RecordStore::list_records`. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub source: Option<String>,
    pub status: Option<Status>,
    pub decision: Option<DecisionFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionFilter {
    /// No decision assigned yet.
    Missing,
    Is(Decision),
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_source(source: &str) -> Self {
        Self { source: Some(source.to_string()), ..Self::default() }
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        if let Some(ref source) = self.source {
            if &record.source != source {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        match &self.decision {
            None => true,
            Some(DecisionFilter::Missing) => record.decision().is_none(),
            Some(DecisionFilter::Is(d)) => record.decision().as_ref() == Some(d),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// The three dependent entity kinds, in promotion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    Branch,
    Service,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Organization => write!(f, "organization"),
            Self::Branch => write!(f, "branch"),
            Self::Service => write!(f, "service"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconcile output
// ---------------------------------------------------------------------------

/// What happened to one id during a reconcile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// First time this id is seen for the source.
    Created,
    /// Was INACTIVE, fetched again with data.
    Reactivated,
    /// Was ACTIVE, now absent or empty in the fetch.
    Deactivated,
    /// ACTIVE before and after; fields refreshed from the fetch.
    Refreshed,
    /// INACTIVE before and after.
    StillInactive,
    /// Mapper failed; excluded from the upsert batch.
    Skipped,
    /// Not written (status management disabled and no data).
    Untouched,
}

impl std::fmt::Display for RowOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Reactivated => write!(f, "reactivated"),
            Self::Deactivated => write!(f, "deactivated"),
            Self::Refreshed => write!(f, "refreshed"),
            Self::StillInactive => write!(f, "still_inactive"),
            Self::Skipped => write!(f, "skipped"),
            Self::Untouched => write!(f, "untouched"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub current: usize,
    pub fetched: usize,
    pub written: usize,
    pub active: usize,
    pub inactive: usize,
    pub outcome_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    pub source: String,
    pub run_at: String,
    pub summary: ReconcileSummary,
    pub skipped: Vec<SkippedRow>,
}

impl ReconcileReport {
    pub fn count(&self, outcome: RowOutcome) -> usize {
        self.summary
            .outcome_counts
            .get(&outcome.to_string())
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Promotion output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DroppedRecord {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindReport {
    pub kind: EntityKind,
    pub table: String,
    /// Records that passed the status/decision filter.
    pub admitted: usize,
    /// Records skipped because another base already owns them.
    pub ignored: usize,
    pub dropped: Vec<DroppedRecord>,
    pub committed: ReconcileReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub base: String,
    pub source: String,
    pub decisions_defaulted: usize,
    pub kinds: Vec<KindReport>,
    /// `id`s of the organizations this run admitted into production.
    pub admitted_org_ids: std::collections::BTreeSet<String>,
}
