//! `srm reconcile` and `srm validate`.

use std::path::Path;

use srm_config::Settings;
use srm_io::{SnapshotFetcher, SqliteStore};
use srm_recon::model::{RecordFilter, RecordUpdate, ReconcileReport, RowOutcome};
use srm_recon::{
    reconcile_with, ColumnMapper, MemoryStore, PromotionConfig, RecordStore, ReconcileOptions,
    ReconcileTarget, SourceConfig,
};

use crate::{emit_json, open_store, promote, CliError};

fn load_source_config(path: &Path) -> Result<SourceConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::usage(format!("cannot read {}: {e}", path.display())))?;
    SourceConfig::from_toml(&text).map_err(|e| {
        CliError::recon(e).with_hint(format!("in {}", path.display()))
    })
}

pub fn cmd_reconcile(
    settings: &Settings,
    config_path: &Path,
    json: bool,
    output: Option<&Path>,
    dry_run: bool,
) -> Result<(), CliError> {
    let config = load_source_config(config_path)?;

    // Snapshot paths are relative to the config file
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut fetcher = SnapshotFetcher::from_config(&config, base_dir);
    let mapper = ColumnMapper::from_config(&config);
    let target = ReconcileTarget { table: &config.table, source: &config.name, fields: &config.fields };
    let options = ReconcileOptions { manage_status: config.manage_status, typecast: config.typecast };

    let mut production = open_store(&settings.production_db, false)?;
    let report = if dry_run {
        let mut scratch = scratch_copy(&production, &config)?;
        reconcile_with(&mut scratch, &target, &mut fetcher, &mapper, options)?
    } else {
        reconcile_with(&mut production, &target, &mut fetcher, &mapper, options)?
    };

    emit_json(&report, json, output)?;
    print_summary(&report, dry_run);
    Ok(())
}

/// The source's current partition, copied into memory.
fn scratch_copy(production: &SqliteStore, config: &SourceConfig) -> Result<MemoryStore, CliError> {
    let current = production.list_records(&config.table, &RecordFilter::by_source(&config.name))?;
    let updates = current
        .into_iter()
        .map(|r| RecordUpdate { id: r.id, source: Some(r.source), status: Some(r.status), fields: r.fields })
        .collect();
    let mut scratch = MemoryStore::new();
    scratch.upsert(&config.table, updates, true)?;
    Ok(scratch)
}

fn print_summary(report: &ReconcileReport, dry_run: bool) {
    let s = &report.summary;
    eprintln!(
        "{}{} -> {}: {} fetched, {} stored before; {} created, {} reactivated, {} deactivated, {} refreshed, {} skipped",
        if dry_run { "(dry run) " } else { "" },
        report.source,
        report.table,
        s.fetched,
        s.current,
        report.count(RowOutcome::Created),
        report.count(RowOutcome::Reactivated),
        report.count(RowOutcome::Deactivated),
        report.count(RowOutcome::Refreshed),
        report.skipped.len(),
    );
    for row in &report.skipped {
        eprintln!("  skipped {}: {}", row.id, row.reason);
    }
}

pub fn cmd_validate(settings: &Settings, configs: &[std::path::PathBuf]) -> Result<(), CliError> {
    let promotion: PromotionConfig = promote::promotion_config(settings);
    promotion.validate()?;
    eprintln!("ok: settings ({} curation bases)", settings.bases.len());

    for path in configs {
        let config = load_source_config(path)?;
        eprintln!("ok: {} (source '{}' -> table '{}')", path.display(), config.name, config.table);
    }
    Ok(())
}
