use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Source config
// ---------------------------------------------------------------------------

/// One external source feeding one canonical table.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Source tag written on every record this source owns.
    pub name: String,
    pub table: String,
    /// Canonical fields this source is allowed to write.
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub manage_status: bool,
    #[serde(default = "default_true")]
    pub typecast: bool,
    #[serde(default)]
    pub list_fields: Vec<String>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub prefer_existing: Vec<String>,
    pub snapshot: SnapshotConfig,
    /// canonical field -> raw column
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    pub file: String,
    #[serde(default)]
    pub format: SnapshotFormat,
    /// Raw column holding the native id. Absent = content-hash ids.
    #[serde(default)]
    pub id_column: Option<String>,
    /// Prefix for native ids; defaults to the source name.
    #[serde(default)]
    pub id_prefix: Option<String>,
    /// CSV field delimiter. Absent = detected from the file.
    #[serde(default)]
    pub delimiter: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    #[default]
    Csv,
    Json,
}

impl std::fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
        }
    }
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: SourceConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("source name must not be empty".into()));
        }
        if self.name.contains(':') {
            return Err(ReconError::ConfigValidation(format!(
                "source name '{}' must not contain ':'",
                self.name
            )));
        }
        if self.table.trim().is_empty() {
            return Err(ReconError::ConfigValidation("table must not be empty".into()));
        }
        if self.fields.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one canonical field is required".into(),
            ));
        }
        if self.columns.is_empty() {
            return Err(ReconError::ConfigValidation(
                "at least one column mapping is required".into(),
            ));
        }

        // Mapped fields must be writable
        for field in self.columns.keys() {
            if !self.fields.contains(field) {
                return Err(ReconError::ConfigValidation(format!(
                    "column mapping targets '{field}', which is not in fields"
                )));
            }
        }

        // Field modifiers must reference mapped fields
        for (what, list) in [
            ("list_fields", &self.list_fields),
            ("required", &self.required),
            ("prefer_existing", &self.prefer_existing),
        ] {
            for field in list {
                if !self.columns.contains_key(field) {
                    return Err(ReconError::ConfigValidation(format!(
                        "{what} references unmapped field '{field}'"
                    )));
                }
            }
        }

        if self.snapshot.file.trim().is_empty() {
            return Err(ReconError::ConfigValidation("snapshot file must not be empty".into()));
        }
        if let Some(delim) = self.snapshot.delimiter {
            if self.snapshot.format != SnapshotFormat::Csv {
                return Err(ReconError::ConfigValidation(format!(
                    "delimiter is only valid for csv snapshots, not {}",
                    self.snapshot.format
                )));
            }
            if !delim.is_ascii() || delim == '"' || delim == '\n' || delim == '\r' {
                return Err(ReconError::ConfigValidation(format!(
                    "delimiter {delim:?} must be a single ASCII character other than a quote or newline"
                )));
            }
        }

        Ok(())
    }

    /// Prefix used to build `<prefix>:<native-id>` ids.
    pub fn id_prefix(&self) -> &str {
        self.snapshot.id_prefix.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Promotion config
// ---------------------------------------------------------------------------

/// Tables and field lists used when promoting curation bases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromotionConfig {
    #[serde(default)]
    pub tables: PromotionTables,
    #[serde(default)]
    pub fields: PromotedFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromotionTables {
    pub organization: String,
    pub branch: String,
    pub service: String,
    /// Production location table used to resolve branch locations.
    #[serde(default)]
    pub location: Option<String>,
}

impl Default for PromotionTables {
    fn default() -> Self {
        Self {
            organization: "Organizations".into(),
            branch: "Branches".into(),
            service: "Services".into(),
            location: Some("Locations".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromotedFields {
    pub organization: Vec<String>,
    pub branch: Vec<String>,
    pub service: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PromotedFields {
    fn default() -> Self {
        Self {
            organization: strings(&[
                "name", "short_name", "kind", "urls", "phone_numbers", "description", "purpose",
            ]),
            branch: strings(&[
                "name",
                "organization",
                "address",
                "address_details",
                "location",
                "description",
                "phone_numbers",
                "urls",
                "situations",
            ]),
            service: strings(&[
                "name",
                "description",
                "details",
                "payment_required",
                "payment_details",
                "urls",
                "phone_numbers",
                "situations",
                "responses",
                "organizations",
                "branches",
                "responses_manual",
                "situations_manual",
                "data_sources",
            ]),
        }
    }
}

impl PromotionConfig {
    pub fn validate(&self) -> Result<(), ReconError> {
        let t = &self.tables;
        for (kind, name) in [
            ("organization", &t.organization),
            ("branch", &t.branch),
            ("service", &t.service),
        ] {
            if name.trim().is_empty() {
                return Err(ReconError::ConfigValidation(format!("{kind} table must not be empty")));
            }
        }
        if t.organization == t.branch || t.branch == t.service || t.organization == t.service {
            return Err(ReconError::ConfigValidation(
                "organization, branch and service tables must be distinct".into(),
            ));
        }
        // Rewritten references are only written if the field is promoted
        for (kind, fields, required) in [
            ("branch", &self.fields.branch, crate::promote::BRANCH_ORG_FIELD),
            ("service", &self.fields.service, crate::promote::SERVICE_ORG_FIELD),
            ("service", &self.fields.service, crate::promote::SERVICE_BRANCH_FIELD),
        ] {
            if !fields.iter().any(|f| f == required) {
                return Err(ReconError::ConfigValidation(format!(
                    "{kind} fields must include '{required}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
name = "manual-data-entry"
table = "Organizations"
fields = ["name", "short_name", "urls"]
list_fields = ["urls"]
required = ["name"]

[snapshot]
file = "orgs.csv"
id_column = "Org Id"
id_prefix = "mde"

[columns]
name = "Org Name"
short_name = "Org Short Name"
urls = "Org Website"
"#;

    #[test]
    fn parse_source_config() {
        let config = SourceConfig::from_toml(SOURCE).unwrap();
        assert_eq!(config.name, "manual-data-entry");
        assert!(config.manage_status);
        assert!(config.typecast);
        assert_eq!(config.snapshot.format, SnapshotFormat::Csv);
        assert_eq!(config.id_prefix(), "mde");
        assert_eq!(config.columns["urls"], "Org Website");
    }

    #[test]
    fn id_prefix_defaults_to_source_name() {
        let toml = SOURCE.replace("id_prefix = \"mde\"\n", "");
        let config = SourceConfig::from_toml(&toml).unwrap();
        assert_eq!(config.id_prefix(), "manual-data-entry");
    }

    #[test]
    fn reject_mapping_outside_fields() {
        let toml = SOURCE.replace("fields = [\"name\", \"short_name\", \"urls\"]", "fields = [\"name\"]");
        let err = SourceConfig::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)), "{err}");
    }

    #[test]
    fn reject_unmapped_required_field() {
        let toml = SOURCE.replace("required = [\"name\"]", "required = [\"phone\"]");
        let err = SourceConfig::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("phone"));
    }

    #[test]
    fn reject_colon_in_source_name() {
        let toml = SOURCE.replace("manual-data-entry", "a:b");
        assert!(SourceConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_bad_toml() {
        let err = SourceConfig::from_toml("name = ").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn promotion_defaults_are_valid() {
        let config = PromotionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fields.organization.len(), 7);
        assert!(config.fields.service.contains(&"branches".to_string()));
    }

    #[test]
    fn promotion_service_fields_keep_references() {
        let mut config = PromotionConfig::default();
        config.fields.service.retain(|f| f != "branches");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("service fields must include 'branches'"), "{err}");

        let mut config = PromotionConfig::default();
        config.fields.service = vec!["name".into(), "branches".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'organizations'"), "{err}");
    }

    #[test]
    fn csv_delimiter_option() {
        let toml = SOURCE.replace("id_prefix = \"mde\"\n", "id_prefix = \"mde\"\ndelimiter = \";\"\n");
        let config = SourceConfig::from_toml(&toml).unwrap();
        assert_eq!(config.snapshot.delimiter, Some(';'));

        let json = toml.replace("file = \"orgs.csv\"", "file = \"orgs.json\"\nformat = \"json\"");
        assert!(SourceConfig::from_toml(&json).is_err());

        let quote = SOURCE.replace("id_prefix = \"mde\"\n", "id_prefix = \"mde\"\ndelimiter = '\"'\n");
        assert!(SourceConfig::from_toml(&quote).is_err());
    }

    #[test]
    fn promotion_tables_must_differ() {
        let mut config = PromotionConfig::default();
        config.tables.branch = config.tables.organization.clone();
        assert!(config.validate().is_err());
    }
}
