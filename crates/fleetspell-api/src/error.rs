use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Top-level error type for the `fleetspell-api` crate.
///
/// `fleetspell-core` decides what to retry based on
/// [`is_unreachable`](Error::is_unreachable) and maps everything else into
/// per-controller failures.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connectivity ────────────────────────────────────────────────
    /// The TCP connection to the endpoint failed (refused, no route, reset
    /// during connect). Expected while a tunnel subprocess is still starting.
    #[error("Controller endpoint {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// A call was made before `login` succeeded or after `logout`.
    #[error("Not connected to controller")]
    NotConnected,

    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected or token no longer valid.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error other than a failed connect.
    #[error("HTTP transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Controller API ──────────────────────────────────────────────
    /// Structured error returned by the controller.
    #[error("Controller API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Classify a `reqwest` failure for the given endpoint.
    ///
    /// Only socket-level failures (refused, reset, aborted, EOF during the
    /// handshake, timed out, no route) become [`Error::Unreachable`]. A TLS
    /// failure on a reachable endpoint becomes [`Error::Tls`]; anything else
    /// stays a transport error. Neither is ever retried.
    pub fn from_transport(endpoint: &str, err: reqwest::Error) -> Self {
        match root_io_kind(&err) {
            Some(kind) if is_unreachable_kind(kind) => Self::Unreachable {
                endpoint: endpoint.to_owned(),
                reason: err.to_string(),
            },
            Some(io::ErrorKind::InvalidData) if err.is_connect() => {
                Self::Tls(error_chain(&err))
            }
            _ => Self::Transport(err),
        }
    }

    /// Returns `true` for the transient "endpoint unreachable" class.
    ///
    /// Authentication, API and TLS errors are fatal: retrying a rejected
    /// password only locks accounts.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Returns `true` if re-authentication might resolve this error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::NotConnected)
    }

    /// Extract the controller error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Kind of the first `io::Error` in the source chain, if any.
///
/// rustls handshake and certificate failures surface there as
/// `InvalidData`; socket failures keep their OS kind.
fn root_io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

fn is_unreachable_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// `outer: inner: root`, for errors whose `Display` hides the cause.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
