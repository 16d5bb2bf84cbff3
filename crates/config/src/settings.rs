// Application settings
// Loaded from ~/.config/srm-etl/settings.toml

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::APP_DIR;

pub const ENV_PRODUCTION_DB: &str = "ETL_PRODUCTION_DB";
pub const ENV_ORGANIZATION_TABLE: &str = "ETL_ORGANIZATION_TABLE";
pub const ENV_BRANCH_TABLE: &str = "ETL_BRANCH_TABLE";
pub const ENV_SERVICE_TABLE: &str = "ETL_SERVICE_TABLE";
pub const ENV_LOCATION_TABLE: &str = "ETL_LOCATION_TABLE";

#[derive(Debug)]
pub enum SettingsError {
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "{}: {message}", path.display()),
            Self::Parse(msg) => write!(f, "settings parse error: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid settings: {msg}"),
        }
    }
}

impl std::error::Error for SettingsError {}

/// Production table names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub organization: String,
    pub branch: String,
    pub service: String,
    /// Empty = no location rewrite
    pub location: String,
    pub taxonomy_mapping: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            organization: "Organizations".into(),
            branch: "Branches".into(),
            service: "Services".into(),
            location: "Locations".into(),
            taxonomy_mapping: "TaxonomyMapping".into(),
        }
    }
}

impl TableNames {
    pub fn location(&self) -> Option<&str> {
        Some(self.location.as_str()).filter(|t| !t.is_empty())
    }
}

/// Per-kind promoted field lists. `None` keeps the built-in list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<String>>,
}

/// A curation base. Bases are promoted in the order they are listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseSettings {
    pub name: String,
    /// Source tag for promoted records (defaults to the name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<String>,
    pub path: PathBuf,
}

impl BaseSettings {
    pub fn source_tag(&self) -> &str {
        self.source_tag.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub production_db: PathBuf,
    pub tables: TableNames,
    pub fields: FieldOverrides,
    #[serde(rename = "base")]
    pub bases: Vec<BaseSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            production_db: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("production.db"),
            tables: TableNames::default(),
            fields: FieldOverrides::default(),
            bases: Vec::new(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("settings.toml")
    }

    /// Load settings from `path` (or the default location), then apply
    /// environment overrides. A missing default file means defaults; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(p) => Self::load_from(p)?,
            None => {
                let p = Self::config_path();
                if p.exists() {
                    Self::load_from(&p)?
                } else {
                    log::debug!("no settings file at {}; using defaults", p.display());
                    Self::default()
                }
            }
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut settings = Self::from_toml(&contents)?;
        // Relative store paths are relative to the settings file
        if let Some(dir) = path.parent() {
            settings.resolve_paths(dir);
        }
        Ok(settings)
    }

    pub fn from_toml(input: &str) -> Result<Self, SettingsError> {
        toml::from_str(input).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    fn resolve_paths(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            let expanded = expand_path(p);
            *p = if expanded.is_relative() { dir.join(expanded) } else { expanded };
        };
        resolve(&mut self.production_db);
        for base in &mut self.bases {
            resolve(&mut base.path);
        }
    }

    /// Apply `ETL_*` overrides from `lookup` (the process environment in
    /// `load`). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(db) = get(ENV_PRODUCTION_DB) {
            self.production_db = expand_path(Path::new(&db));
        }
        for (key, slot) in [
            (ENV_ORGANIZATION_TABLE, &mut self.tables.organization),
            (ENV_BRANCH_TABLE, &mut self.tables.branch),
            (ENV_SERVICE_TABLE, &mut self.tables.service),
            (ENV_LOCATION_TABLE, &mut self.tables.location),
        ] {
            if let Some(value) = get(key) {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.production_db.as_os_str().is_empty() {
            return Err(SettingsError::Invalid("production_db must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for base in &self.bases {
            if base.name.trim().is_empty() {
                return Err(SettingsError::Invalid("curation base name must not be empty".into()));
            }
            if !seen.insert(base.name.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "curation base '{}' is listed twice",
                    base.name
                )));
            }
            if base.path.as_os_str().is_empty() {
                return Err(SettingsError::Invalid(format!(
                    "curation base '{}' has no path",
                    base.name
                )));
            }
        }
        Ok(())
    }

    pub fn base(&self, name: &str) -> Option<&BaseSettings> {
        self.bases.iter().find(|b| b.name == name)
    }

    /// Save settings to `path`
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io = |e: std::io::Error| SettingsError::Io { path: path.to_path_buf(), message: e.to_string() };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        fs::write(path, text).map_err(io)
    }
}

/// Expand `~` and `$VAR`/`${VAR}` in a configured path. An undefined
/// variable leaves the path as written.
fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(e) => {
            log::warn!("cannot expand '{raw}': {e}");
            path.to_path_buf()
        }
    }
}
