//! Curation promotion: copy reviewed records from a curation base into the
//! production tables.
//!
//! Kinds are processed in dependency order (organization, branch, service).
//! Each kind is filtered by status and decision, committed through the
//! source reconciler, and then its identity mapping is rebuilt from the
//! production table so the next kind can rewrite its references.
//! A downstream record whose references all point at records that were not
//! admitted is dropped.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::config::PromotionConfig;
use crate::error::{FetchError, ReconError, RewriteError};
use crate::identity::IdentityMapping;
use crate::model::{
    CanonicalRecord, DecisionFilter, DroppedRecord, EntityKind, Fields, KindReport,
    PromotionReport, RecordFilter, RecordUpdate, ReconcileReport, SourceRecord, Status,
    DECISION_FIELD,
};
use crate::reconcile::{reconcile_with, ReconcileOptions, ReconcileTarget};
use crate::source::FieldCopyMapper;
use crate::store::RecordStore;

/// Branch → organization references.
pub const BRANCH_ORG_FIELD: &str = "organization";
pub const BRANCH_LOCATION_FIELD: &str = "location";
/// Service → organization references.
pub const SERVICE_ORG_FIELD: &str = "organizations";
/// Service → branch references.
pub const SERVICE_BRANCH_FIELD: &str = "branches";

// ---------------------------------------------------------------------------
// Typed rows
// ---------------------------------------------------------------------------

/// An admitted curation organization.
#[derive(Debug, Clone)]
pub struct OrgRow {
    pub key: String,
    pub id: String,
    pub fields: Fields,
}

impl OrgRow {
    pub fn from_record(record: CanonicalRecord) -> Self {
        Self { key: record.internal_key, id: record.id, fields: record.fields }
    }
}

/// An admitted curation branch with its references split out of `fields`.
#[derive(Debug, Clone)]
pub struct BranchRow {
    pub key: String,
    pub id: String,
    pub organizations: Vec<String>,
    pub location: Option<String>,
    pub fields: Fields,
}

impl BranchRow {
    pub fn from_record(record: CanonicalRecord) -> Result<Self, RewriteError> {
        let organizations =
            reference_list(EntityKind::Branch, &record.id, &record.fields, BRANCH_ORG_FIELD)?;
        let location = single_reference(&record.id, &record.fields)?;
        Ok(Self {
            key: record.internal_key,
            id: record.id,
            organizations,
            location,
            fields: record.fields,
        })
    }

    /// Rewrite organization references and the location. Fails when no
    /// organization reference survives.
    pub fn rewrite(
        mut self,
        orgs: &IdentityMapping,
        locations: &HashMap<String, String>,
    ) -> Result<Self, RewriteError> {
        self.organizations = orgs.rewrite(&self.organizations);
        if self.organizations.is_empty() {
            return Err(RewriteError {
                kind: EntityKind::Branch,
                id: self.id,
                field: BRANCH_ORG_FIELD.into(),
                message: "no admitted organization referenced".into(),
            });
        }
        self.location = self
            .location
            .map(|l| locations.get(&l).cloned().unwrap_or(l));
        Ok(self)
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = self.fields;
        fields.insert(BRANCH_ORG_FIELD.into(), string_list(self.organizations));
        fields.insert(
            BRANCH_LOCATION_FIELD.into(),
            string_list(self.location.into_iter().collect()),
        );
        fields
    }
}

/// An admitted curation service with its references split out of `fields`.
#[derive(Debug, Clone)]
pub struct ServiceRow {
    pub key: String,
    pub id: String,
    pub organizations: Vec<String>,
    pub branches: Vec<String>,
    pub fields: Fields,
}

impl ServiceRow {
    pub fn from_record(record: CanonicalRecord) -> Result<Self, RewriteError> {
        let organizations =
            reference_list(EntityKind::Service, &record.id, &record.fields, SERVICE_ORG_FIELD)?;
        let branches =
            reference_list(EntityKind::Service, &record.id, &record.fields, SERVICE_BRANCH_FIELD)?;
        Ok(Self {
            key: record.internal_key,
            id: record.id,
            organizations,
            branches,
            fields: record.fields,
        })
    }

    /// Rewrite both reference lists. Fails when neither list has a
    /// surviving reference.
    pub fn rewrite(
        mut self,
        orgs: &IdentityMapping,
        branches: &IdentityMapping,
    ) -> Result<Self, RewriteError> {
        self.organizations = orgs.rewrite(&self.organizations);
        self.branches = branches.rewrite(&self.branches);
        if self.organizations.is_empty() && self.branches.is_empty() {
            return Err(RewriteError {
                kind: EntityKind::Service,
                id: self.id,
                field: format!("{SERVICE_ORG_FIELD}/{SERVICE_BRANCH_FIELD}"),
                message: "no admitted organization or branch referenced".into(),
            });
        }
        Ok(self)
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = self.fields;
        fields.insert(SERVICE_ORG_FIELD.into(), string_list(self.organizations));
        fields.insert(SERVICE_BRANCH_FIELD.into(), string_list(self.branches));
        fields
    }
}

fn string_list(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

/// Read a linked-record field as a list of keys. Missing/null is empty; a
/// bare string is a single reference.
fn reference_list(
    kind: EntityKind,
    id: &str,
    fields: &Fields,
    field: &str,
) -> Result<Vec<String>, RewriteError> {
    let invalid = |message: String| RewriteError {
        kind,
        id: id.to_string(),
        field: field.to_string(),
        message,
    };
    match fields.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(invalid(format!("reference {other} is not a string"))),
            })
            .collect(),
        Some(other) => Err(invalid(format!("expected a list of references, got {other}"))),
    }
}

fn single_reference(id: &str, fields: &Fields) -> Result<Option<String>, RewriteError> {
    let mut refs = reference_list(EntityKind::Branch, id, fields, BRANCH_LOCATION_FIELD)?;
    Ok(if refs.is_empty() { None } else { Some(refs.swap_remove(0)) })
}

// ---------------------------------------------------------------------------
// Promoter
// ---------------------------------------------------------------------------

/// A curation base and the source tag its records get in production.
pub struct CurationBase<'a> {
    pub name: String,
    pub source_tag: String,
    pub store: &'a mut dyn RecordStore,
}

pub struct Promoter<'a, P: RecordStore + ?Sized> {
    production: &'a mut P,
    config: &'a PromotionConfig,
}

impl<'a, P: RecordStore + ?Sized> Promoter<'a, P> {
    pub fn new(production: &'a mut P, config: &'a PromotionConfig) -> Self {
        Self { production, config }
    }

    /// Promote one curation base. Organizations whose `id` is in
    /// `ignore_ids` are left to the base that already owns them.
    pub fn promote<C: RecordStore + ?Sized>(
        &mut self,
        base: &str,
        curation: &mut C,
        source_tag: &str,
        ignore_ids: &BTreeSet<String>,
    ) -> Result<PromotionReport, ReconError> {
        log::info!("promoting curation base '{base}' as source '{source_tag}'");
        let tables = &self.config.tables;

        let mut decisions_defaulted = 0;
        for table in [&tables.organization, &tables.branch, &tables.service] {
            decisions_defaulted += default_decisions(curation, table)?;
        }

        let (org_report, org_ids) = self.promote_organizations(curation, source_tag, ignore_ids)?;
        let (branch_report, branch_ids) = self.promote_branches(curation, source_tag, &org_ids)?;
        let service_report = self.promote_services(curation, source_tag, &org_ids, &branch_ids)?;

        let admitted_org_ids = org_ids.ids();
        log::info!(
            "curation base '{base}': {} organizations, {} branches, {} services promoted",
            admitted_org_ids.len(),
            branch_ids.len(),
            service_report.committed.summary.active,
        );

        Ok(PromotionReport {
            base: base.to_string(),
            source: source_tag.to_string(),
            decisions_defaulted,
            kinds: vec![org_report, branch_report, service_report],
            admitted_org_ids,
        })
    }

    fn promote_organizations<C: RecordStore + ?Sized>(
        &mut self,
        curation: &C,
        source_tag: &str,
        ignore_ids: &BTreeSet<String>,
    ) -> Result<(KindReport, IdentityMapping), ReconError> {
        let table = self.config.tables.organization.clone();
        let records = admitted(curation, &table)?;
        let admitted_count = records.len();

        let mut mapping = IdentityMapping::new(EntityKind::Organization);
        let mut rows = Vec::new();
        let mut ignored = 0;
        for row in records.into_iter().map(OrgRow::from_record) {
            if ignore_ids.contains(&row.id) {
                log::debug!("organization '{}' already owned by another base; ignored", row.id);
                ignored += 1;
                continue;
            }
            mapping.register(&row.key, &row.id);
            rows.push((row.id, row.fields));
        }

        let fields = self.config.fields.organization.clone();
        let committed = self.commit(&table, source_tag, &fields, rows)?;
        let mapping = mapping.rebuild(&*self.production, &table)?;

        let report = KindReport {
            kind: EntityKind::Organization,
            table,
            admitted: admitted_count,
            ignored,
            dropped: Vec::new(),
            committed,
        };
        Ok((report, mapping))
    }

    fn promote_branches<C: RecordStore + ?Sized>(
        &mut self,
        curation: &C,
        source_tag: &str,
        orgs: &IdentityMapping,
    ) -> Result<(KindReport, IdentityMapping), ReconError> {
        let table = self.config.tables.branch.clone();
        let locations = self.location_keys()?;
        let records = admitted(curation, &table)?;
        let admitted_count = records.len();

        let mut mapping = IdentityMapping::new(EntityKind::Branch);
        let mut rows = Vec::new();
        let mut dropped = Vec::new();
        for record in records {
            let result = BranchRow::from_record(record).and_then(|row| row.rewrite(orgs, &locations));
            match result {
                Ok(row) => {
                    mapping.register(&row.key, &row.id);
                    rows.push((row.id.clone(), row.into_fields()));
                }
                Err(e) => dropped.push(drop_record(e)),
            }
        }

        let fields = self.config.fields.branch.clone();
        let committed = self.commit(&table, source_tag, &fields, rows)?;
        let mapping = mapping.rebuild(&*self.production, &table)?;

        let report = KindReport {
            kind: EntityKind::Branch,
            table,
            admitted: admitted_count,
            ignored: 0,
            dropped,
            committed,
        };
        Ok((report, mapping))
    }

    fn promote_services<C: RecordStore + ?Sized>(
        &mut self,
        curation: &C,
        source_tag: &str,
        orgs: &IdentityMapping,
        branches: &IdentityMapping,
    ) -> Result<KindReport, ReconError> {
        let table = self.config.tables.service.clone();
        let records = admitted(curation, &table)?;
        let admitted_count = records.len();

        let mut rows = Vec::new();
        let mut dropped = Vec::new();
        for record in records {
            let result =
                ServiceRow::from_record(record).and_then(|row| row.rewrite(orgs, branches));
            match result {
                Ok(row) => rows.push((row.id.clone(), row.into_fields())),
                Err(e) => dropped.push(drop_record(e)),
            }
        }

        let fields = self.config.fields.service.clone();
        let committed = self.commit(&table, source_tag, &fields, rows)?;

        Ok(KindReport {
            kind: EntityKind::Service,
            table,
            admitted: admitted_count,
            ignored: 0,
            dropped,
            committed,
        })
    }

    /// Production location `id` → `internal_key`, empty when no location
    /// table is configured.
    fn location_keys(&self) -> Result<HashMap<String, String>, ReconError> {
        let Some(ref table) = self.config.tables.location else {
            return Ok(HashMap::new());
        };
        Ok(self
            .production
            .list_records(table, &RecordFilter::all())?
            .into_iter()
            .map(|r| (r.id, r.internal_key))
            .collect())
    }

    /// Write the surviving rows through the source reconciler.
    fn commit(
        &mut self,
        table: &str,
        source_tag: &str,
        fields: &[String],
        rows: Vec<(String, Fields)>,
    ) -> Result<ReconcileReport, ReconError> {
        let mut batch: Option<Vec<SourceRecord>> = Some(
            rows.into_iter()
                .map(|(id, fields)| SourceRecord::new(id, Value::Object(fields.into_iter().collect())))
                .collect(),
        );
        let mut fetch =
            move || -> Result<Vec<SourceRecord>, FetchError> { Ok(batch.take().unwrap_or_default()) };
        let target = ReconcileTarget { table, source: source_tag, fields };
        reconcile_with(
            &mut *self.production,
            &target,
            &mut fetch,
            &FieldCopyMapper,
            ReconcileOptions { manage_status: true, typecast: true },
        )
    }
}

fn drop_record(e: RewriteError) -> DroppedRecord {
    log::warn!("dropping {e}");
    DroppedRecord { id: e.id.clone(), reason: e.to_string() }
}

/// Assign `New` to every record of `table` that has no decision yet.
fn default_decisions<C: RecordStore + ?Sized>(
    curation: &mut C,
    table: &str,
) -> Result<usize, ReconError> {
    let filter = RecordFilter { decision: Some(DecisionFilter::Missing), ..RecordFilter::all() };
    let updates: Vec<RecordUpdate> = curation
        .list_records(table, &filter)?
        .into_iter()
        .map(|r| {
            let mut fields = Fields::new();
            fields.insert(DECISION_FIELD.into(), Value::String("New".into()));
            RecordUpdate::fields_only(r.id, fields)
        })
        .collect();
    let count = updates.len();
    if count > 0 {
        curation.upsert(table, updates, true)?;
        log::info!("defaulted {count} decisions to 'New' in '{table}'");
    }
    Ok(count)
}

/// ACTIVE records whose decision is neither Rejected nor Suspended.
fn admitted<C: RecordStore + ?Sized>(
    curation: &C,
    table: &str,
) -> Result<Vec<CanonicalRecord>, ReconError> {
    let filter = RecordFilter { status: Some(Status::Active), ..RecordFilter::all() };
    Ok(curation
        .list_records(table, &filter)?
        .into_iter()
        .filter(|r| r.decision().map_or(true, |d| d.admits()))
        .collect())
}

/// Promote several curation bases in priority order. Each base ignores the
/// organizations admitted by every base before it.
pub fn promote_all<P: RecordStore + ?Sized>(
    production: &mut P,
    config: &PromotionConfig,
    bases: &mut [CurationBase<'_>],
) -> Result<Vec<PromotionReport>, ReconError> {
    let mut promoter = Promoter::new(production, config);
    let mut owned: BTreeSet<String> = BTreeSet::new();
    let mut reports = Vec::with_capacity(bases.len());

    for base in bases.iter_mut() {
        let report = promoter.promote(&base.name, &mut *base.store, &base.source_tag, &owned)?;
        owned.extend(report.admitted_org_ids.iter().cloned());
        reports.push(report);
    }
    Ok(reports)
}
