// Configuration loading

pub mod settings;

pub use settings::{BaseSettings, FieldOverrides, Settings, SettingsError, TableNames};

/// Directory name under the user config/data dirs.
pub const APP_DIR: &str = "srm-etl";
