//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract — pipeline schedulers rely on them.
//!
//! # Exit Codes
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success                                                  |
//! | 1    | General error (output could not be written)             |
//! | 2    | Usage or configuration error (bad args, invalid config)  |
//! | 3    | Fetch failure: the source snapshot could not be read     |
//! | 4    | Record store failure                                     |
//!
//! A fetch failure is the only error a pipeline run treats as fatal for
//! the source; map and rewrite errors are reported, not exit codes.

use srm_config::SettingsError;
use srm_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - output could not be written.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable or invalid config/settings.
pub const EXIT_USAGE: u8 = 2;

/// The fetch step failed; nothing was written.
pub const EXIT_FETCH: u8 = 3;

/// The record store rejected a read or write.
pub const EXIT_STORE: u8 = 4;

pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::Fetch { .. } => EXIT_FETCH,
        ReconError::Store(_) => EXIT_STORE,
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_USAGE,
    }
}

pub fn settings_exit_code(_err: &SettingsError) -> u8 {
    EXIT_USAGE
}
