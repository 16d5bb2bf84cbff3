// srm - reconcile external sources into the canonical tables and promote
// curated records into production

mod exit_codes;
mod promote;
mod reconcile;
mod taxonomy;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use srm_config::{Settings, SettingsError};
use srm_io::SqliteStore;
use srm_recon::{ReconError, StoreError};

use exit_codes::{recon_exit_code, settings_exit_code, EXIT_ERROR, EXIT_STORE, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "srm")]
#[command(about = "Social-services record pipeline: source reconciliation and curation promotion")]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/srm-etl/settings.toml)
    #[arg(long, global = true, env = "SRM_SETTINGS")]
    settings: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one source snapshot into its canonical table
    #[command(after_help = "\
Examples:
  srm reconcile sources/guidestar.toml
  srm reconcile sources/guidestar.toml --json
  srm reconcile sources/shil.toml --dry-run")]
    Reconcile {
        /// Source config (TOML)
        config: PathBuf,

        /// Output the run report as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON report to a file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Reconcile against a scratch copy; production is not written
        #[arg(long)]
        dry_run: bool,
    },

    /// Promote curation bases into production, in settings order
    #[command(after_help = "\
Examples:
  srm promote
  srm promote --base entities
  srm promote --json > promotion.json")]
    Promote {
        /// Only these bases (repeatable); priority order stays as configured
        #[arg(long = "base", value_name = "NAME")]
        bases: Vec<String>,

        /// Output the run reports as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write the JSON reports to a file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Taxonomy tag utilities
    Taxonomy {
        #[command(subcommand)]
        command: taxonomy::TaxonomyCommands,
    },

    /// Validate settings and source configs without running
    #[command(after_help = "\
Examples:
  srm validate
  srm validate sources/*.toml")]
    Validate {
        /// Source configs to check
        configs: Vec<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Stdout is reserved for --json output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = Settings::load(cli.settings.as_deref())
        .map_err(CliError::settings)
        .and_then(|settings| run(&settings, cli.command));

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn run(settings: &Settings, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Reconcile { config, json, output, dry_run } => {
            reconcile::cmd_reconcile(settings, &config, json, output.as_deref(), dry_run)
        }
        Commands::Promote { bases, json, output } => {
            promote::cmd_promote(settings, &bases, json, output.as_deref())
        }
        Commands::Taxonomy { command } => taxonomy::cmd_taxonomy(settings, command),
        Commands::Validate { configs } => reconcile::cmd_validate(settings, &configs),
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn recon(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::Fetch { .. } => Some("check the snapshot file named in the source config".to_string()),
            _ => None,
        };
        Self { code: recon_exit_code(&err), message: err.to_string(), hint }
    }

    pub fn settings(err: SettingsError) -> Self {
        Self { code: settings_exit_code(&err), message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        Self::recon(err)
    }
}

impl From<StoreError> for CliError {
    fn from(err: StoreError) -> Self {
        Self::recon(ReconError::Store(err))
    }
}

/// Open a store file, creating its directory. With `must_exist`, a missing
/// file is a usage error instead of a new empty store.
pub fn open_store(path: &Path, must_exist: bool) -> Result<SqliteStore, CliError> {
    if must_exist && !path.exists() {
        return Err(CliError::usage(format!("store not found: {}", path.display())));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| CliError::io(format!("cannot create {}: {e}", parent.display())))?;
    }
    SqliteStore::open(path).map_err(|e| CliError {
        code: EXIT_STORE,
        message: format!("{}: {e}", path.display()),
        hint: None,
    })
}

/// Write a JSON report to `output` and/or stdout.
pub fn emit_json<T: serde::Serialize>(value: &T, json: bool, output: Option<&Path>) -> Result<(), CliError> {
    if !json && output.is_none() {
        return Ok(());
    }
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::io(format!("JSON serialization error: {e}")))?;
    if let Some(path) = output {
        fs::write(path, &json_str).map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if json {
        println!("{json_str}");
    }
    Ok(())
}
