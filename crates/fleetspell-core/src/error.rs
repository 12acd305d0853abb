// ── Core error types ──
//
// Errors surfaced by the connection layer, the command protocol and the
// fleet runner. Per-controller kinds end up as `CommandResult` failures;
// `Configuration` and `Cancelled` abort the whole run. The
// `From<fleetspell_api::Error>` impl keeps the transient class explicit:
// only `Unreachable` maps to a retryable variant.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// Endpoint refused or did not accept the TCP connection. The only
    /// variant the retrying connector retries.
    #[error("Controller endpoint {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error(
        "Could not connect to controller {name} ({uuid}) after {attempts} attempt(s) in {:.1}s: {last_error}",
        .elapsed.as_secs_f64()
    )]
    ConnectionExhausted {
        uuid: String,
        name: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last_error: Box<CoreError>,
    },

    #[error("Cannot connect to controller at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Tunnel errors ────────────────────────────────────────────────
    #[error("No free local port in range {start}..={end}")]
    NoFreePort { start: u16, end: u16 },

    #[error("Failed to spawn `{program}`: {reason}")]
    TunnelSpawn { program: String, reason: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    #[error("Command failed: {message}")]
    CommandExecution { message: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Run-level errors ─────────────────────────────────────────────
    #[error("Invalid configuration for `{field}`: {reason}")]
    Configuration { field: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The transient class: worth another dial attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Errors that abort the whole run instead of being recorded against a
    /// single controller.
    pub fn aborts_run(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Cancelled)
    }

    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<fleetspell_api::Error> for CoreError {
    fn from(err: fleetspell_api::Error) -> Self {
        match err {
            fleetspell_api::Error::Unreachable { endpoint, reason } => {
                CoreError::Unreachable { endpoint, reason }
            }
            fleetspell_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            fleetspell_api::Error::NotConnected => CoreError::Precondition {
                message: "controller is not connected".into(),
            },
            fleetspell_api::Error::Api {
                status,
                code,
                message,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            fleetspell_api::Error::Transport(e) => CoreError::ConnectionFailed {
                endpoint: e
                    .url()
                    .and_then(|u| u.host_str().map(ToOwned::to_owned))
                    .unwrap_or_else(|| "<unknown>".into()),
                reason: e.to_string(),
            },
            fleetspell_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                endpoint: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            fleetspell_api::Error::InvalidUrl(e) => CoreError::config("endpoint", e.to_string()),
            fleetspell_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
