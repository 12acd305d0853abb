//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` into user-facing errors with
//! actionable help text.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use fleetspell_config::ConfigError;
use fleetspell_core::CoreError;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 127;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {}", path.display())]
    #[diagnostic(
        code(fleetspell::no_config),
        help(
            "Create the file, point --config / FLEETSPELL_CONFIG at it,\n\
             or set FLEETSPELL_DATA to the directory holding config.yaml."
        )
    )]
    NoConfig { path: PathBuf },

    #[error("Could not load configuration: {message}")]
    #[diagnostic(code(fleetspell::config))]
    ConfigLoad { message: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fleetspell::validation))]
    Validation { field: String, reason: String },

    #[error("No controller matches filter `{expression}`")]
    #[diagnostic(
        code(fleetspell::no_match),
        help(
            "Filter keys: name, customer, owner, uuid, endpoint, description, risk, tags.\n\
             Values are comma separated; keys are separated by spaces."
        )
    )]
    NoMatchingController { expression: String },

    #[error("Invalid patch file {}: {reason}", path.display())]
    #[diagnostic(code(fleetspell::patch_file))]
    PatchFile { path: PathBuf, reason: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Write command '{action}' requires confirmation")]
    #[diagnostic(
        code(fleetspell::confirmation_required),
        help("Use --yes (-y) or --silent to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Run outcome ──────────────────────────────────────────────────
    #[error("Run cancelled")]
    #[diagnostic(code(fleetspell::cancelled))]
    Cancelled,

    #[error("{failed} of {total} controller(s) failed")]
    #[diagnostic(code(fleetspell::controllers_failed))]
    ControllersFailed { failed: usize, total: usize },

    #[error("{message}")]
    #[diagnostic(code(fleetspell::run))]
    Run { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render JSON output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not render YAML output: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => exit_code::INTERRUPTED,
            _ => exit_code::GENERAL,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig { path },
            ConfigError::NoMatch { expression } => Self::NoMatchingController { expression },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(err) => Self::ConfigLoad {
                message: err.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration { field, reason } => Self::Validation { field, reason },
            CoreError::Cancelled => Self::Cancelled,
            other => Self::Run {
                message: other.to_string(),
            },
        }
    }
}

impl From<dialoguer::Error> for CliError {
    fn from(err: dialoguer::Error) -> Self {
        Self::Io(std::io::Error::other(err))
    }
}
