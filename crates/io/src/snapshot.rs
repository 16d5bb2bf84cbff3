// Snapshot fetchers: a source's fetched batch read from a CSV or JSON file

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use srm_recon::config::{SnapshotFormat, SourceConfig};
use srm_recon::{content_id, FetchError, Fetcher, SourceRecord};

/// Placeholder rows some sources keep at the top of their sheets.
const DUMMY: &str = "dummy";

/// Reads the whole batch for one source from a snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    path: PathBuf,
    format: SnapshotFormat,
    id_column: Option<String>,
    id_prefix: String,
    delimiter: Option<u8>,
    /// Raw column holding the display name, for the dummy-row filter.
    name_column: String,
}

impl SnapshotFetcher {
    /// Build from a source config. A relative snapshot path is resolved
    /// against `base_dir` (the directory of the config file).
    pub fn from_config(config: &SourceConfig, base_dir: &Path) -> Self {
        let file = Path::new(&config.snapshot.file);
        let path = if file.is_absolute() { file.to_path_buf() } else { base_dir.join(file) };
        Self {
            path,
            format: config.snapshot.format,
            id_column: config.snapshot.id_column.clone(),
            id_prefix: config.id_prefix().to_string(),
            // Validated as ASCII
            delimiter: config.snapshot.delimiter.map(|c| c as u8),
            name_column: config.columns.get("name").cloned().unwrap_or_else(|| "name".into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> Result<Vec<Map<String, Value>>, String> {
        match self.format {
            SnapshotFormat::Csv => crate::csv::read_rows(&self.path, self.delimiter),
            SnapshotFormat::Json => crate::json::read_rows(&self.path),
        }
    }

    /// `<prefix>:<native id>` from the id column, or a content hash when the
    /// source has no ids. `None` when the id column is empty.
    fn record_id(&self, row: &Map<String, Value>) -> Option<String> {
        match &self.id_column {
            Some(column) => native_id(row.get(column)?).map(|id| format!("{}:{id}", self.id_prefix)),
            None => Some(content_id(&self.id_prefix, &Value::Object(row.clone()))),
        }
    }

    fn is_dummy(&self, row: &Map<String, Value>) -> bool {
        let matches = |v: Option<&Value>| v.and_then(Value::as_str).is_some_and(|s| s.trim().eq_ignore_ascii_case(DUMMY));
        let id_col = self.id_column.as_deref().unwrap_or("id");
        matches(row.get(id_col)) || matches(row.get(&self.name_column))
    }
}

fn native_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Fetcher for SnapshotFetcher {
    fn fetch(&mut self) -> Result<Vec<SourceRecord>, FetchError> {
        let rows = self
            .read_rows()
            .map_err(|e| FetchError::new(format!("{}: {e}", self.path.display())))?;

        let total = rows.len();
        let mut records = Vec::with_capacity(total);
        for (idx, row) in rows.into_iter().enumerate() {
            if self.is_dummy(&row) {
                log::debug!("{}: row {idx} is a placeholder; skipped", self.path.display());
                continue;
            }
            match self.record_id(&row) {
                Some(id) => records.push(SourceRecord::new(id, Value::Object(row))),
                None => log::warn!("{}: row {idx} has no id; skipped", self.path.display()),
            }
        }

        log::debug!("{}: {} of {total} rows fetched", self.path.display(), records.len());
        Ok(records)
    }
}
