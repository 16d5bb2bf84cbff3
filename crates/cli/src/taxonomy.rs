//! `srm taxonomy` — tag closure and category-name resolution.

use clap::Subcommand;
use serde_json::json;

use srm_config::Settings;
use srm_recon::taxonomy::{close, register_unknown, TaxonomyMapping};

use crate::{open_store, CliError};

#[derive(Subcommand)]
pub enum TaxonomyCommands {
    /// Print tags together with all their ancestor tags
    #[command(after_help = "\
Examples:
  srm taxonomy close human_services:health:mental_health
  srm taxonomy close human_situations:age_group:youth human_situations:disability --json")]
    Close {
        /// Colon-delimited tags
        #[arg(required = true)]
        tags: Vec<String>,

        /// Output a JSON array instead of one tag per line
        #[arg(long)]
        json: bool,
    },

    /// Resolve source category names through the taxonomy mapping table
    #[command(after_help = "\
Examples:
  srm taxonomy resolve \"Mental health\" \"Youth\"
  srm taxonomy resolve \"Gardening\" --no-register")]
    Resolve {
        /// Category names as they appear in the source
        #[arg(required = true)]
        names: Vec<String>,

        /// Do not add unmapped names to the mapping table
        #[arg(long)]
        no_register: bool,
    },
}

pub fn cmd_taxonomy(settings: &Settings, cmd: TaxonomyCommands) -> Result<(), CliError> {
    match cmd {
        TaxonomyCommands::Close { tags, json } => cmd_close(&tags, json),
        TaxonomyCommands::Resolve { names, no_register } => cmd_resolve(settings, &names, !no_register),
    }
}

fn cmd_close(tags: &[String], json: bool) -> Result<(), CliError> {
    let closed = close(tags);
    if json {
        println!("{}", json!(closed));
    } else {
        for tag in &closed {
            println!("{tag}");
        }
    }
    Ok(())
}

fn cmd_resolve(settings: &Settings, names: &[String], register: bool) -> Result<(), CliError> {
    let table = &settings.tables.taxonomy_mapping;
    let mut store = open_store(&settings.production_db, false)?;
    let mapping = TaxonomyMapping::load(&store, table)?;
    let resolution = mapping.resolve(names);
    let (responses, situations) = resolution.closed();

    println!(
        "{}",
        json!({
            "responses": responses,
            "situations": situations,
            "unknown": resolution.unknown,
        })
    );

    if !resolution.unknown.is_empty() {
        if register {
            let added = register_unknown(&mut store, table, &resolution.unknown)?;
            eprintln!("registered {added} names in '{table}' for curation");
        } else {
            eprintln!("{} unmapped names left unregistered", resolution.unknown.len());
        }
    }
    Ok(())
}
