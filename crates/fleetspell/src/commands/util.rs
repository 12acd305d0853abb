//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::Path;

use secrecy::SecretString;
use tracing::info;

use fleetspell_core::command::PatchFile;

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Ask for a new user's password. An empty answer means "generate one".
pub fn prompt_password() -> Result<SecretString, CliError> {
    let password = dialoguer::Password::new()
        .with_prompt("Password (empty for a random one)")
        .allow_empty_password(true)
        .interact()?;
    Ok(SecretString::from(password))
}

/// Read and parse a YAML patch file for `update-packages --patch`.
pub fn read_patch_file(path: &Path) -> Result<PatchFile, CliError> {
    let invalid = |reason: String| CliError::PatchFile {
        path: path.to_path_buf(),
        reason,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let patch: PatchFile = serde_yaml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
    if patch.applications.is_empty() {
        return Err(invalid("no applications listed".into()));
    }
    info!(path = %path.display(), applications = patch.applications.len(), "loaded patch file");
    Ok(patch)
}
