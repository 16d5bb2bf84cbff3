//! `srm promote` — promote curation bases into production.

use std::path::Path;

use srm_config::{BaseSettings, Settings};
use srm_io::SqliteStore;
use srm_recon::config::{PromotedFields, PromotionTables};
use srm_recon::model::PromotionReport;
use srm_recon::{promote_all, CurationBase, PromotionConfig};

use crate::{emit_json, open_store, CliError};

/// Promotion tables and field lists from settings, falling back to the
/// built-in field lists.
pub fn promotion_config(settings: &Settings) -> PromotionConfig {
    let defaults = PromotedFields::default();
    let tables = &settings.tables;
    let fields = &settings.fields;
    PromotionConfig {
        tables: PromotionTables {
            organization: tables.organization.clone(),
            branch: tables.branch.clone(),
            service: tables.service.clone(),
            location: tables.location().map(str::to_string),
        },
        fields: PromotedFields {
            organization: fields.organization.clone().unwrap_or(defaults.organization),
            branch: fields.branch.clone().unwrap_or(defaults.branch),
            service: fields.service.clone().unwrap_or(defaults.service),
        },
    }
}

/// Bases to run, in configured priority order.
fn select_bases<'a>(settings: &'a Settings, names: &[String]) -> Result<Vec<&'a BaseSettings>, CliError> {
    if settings.bases.is_empty() {
        return Err(CliError::usage("no curation bases configured")
            .with_hint(format!("add [[base]] entries to {}", Settings::config_path().display())));
    }
    for name in names {
        if settings.base(name).is_none() {
            let known: Vec<&str> = settings.bases.iter().map(|b| b.name.as_str()).collect();
            return Err(CliError::usage(format!("unknown curation base '{name}'"))
                .with_hint(format!("configured bases: {}", known.join(", "))));
        }
    }
    Ok(settings
        .bases
        .iter()
        .filter(|b| names.is_empty() || names.contains(&b.name))
        .collect())
}

pub fn cmd_promote(
    settings: &Settings,
    names: &[String],
    json: bool,
    output: Option<&Path>,
) -> Result<(), CliError> {
    let config = promotion_config(settings);
    config.validate()?;

    let selected = select_bases(settings, names)?;
    let mut stores: Vec<(&BaseSettings, SqliteStore)> = Vec::with_capacity(selected.len());
    for base in selected {
        stores.push((base, open_store(&base.path, true)?));
    }
    let mut production = open_store(&settings.production_db, false)?;

    let mut bases: Vec<CurationBase<'_>> = stores
        .iter_mut()
        .map(|(base, store)| CurationBase {
            name: base.name.clone(),
            source_tag: base.source_tag().to_string(),
            store,
        })
        .collect();
    let reports = promote_all(&mut production, &config, &mut bases)?;

    emit_json(&reports, json, output)?;
    for report in &reports {
        print_summary(report);
    }
    Ok(())
}

fn print_summary(report: &PromotionReport) {
    eprintln!(
        "{} (source '{}'): {} decisions defaulted to New",
        report.base, report.source, report.decisions_defaulted
    );
    for kind in &report.kinds {
        let s = &kind.committed.summary;
        eprintln!(
            "  {:<12} {} admitted, {} ignored, {} dropped; {} active / {} inactive in '{}'",
            kind.kind.to_string(),
            kind.admitted,
            kind.ignored,
            kind.dropped.len(),
            s.active,
            s.inactive,
            kind.table,
        );
        for dropped in &kind.dropped {
            eprintln!("    dropped {}: {}", dropped.id, dropped.reason);
        }
    }
}
