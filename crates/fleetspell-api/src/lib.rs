//! Async client for the controller RPC surface used by `fleetspell`.
//!
//! One [`ControllerClient`] talks to one controller endpoint over
//! JSON/HTTPS, trusting only the controller's own CA certificate.
//! [`Error::is_unreachable`] is the transient/fatal boundary the
//! connection layer retries on.

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::ControllerClient;
pub use error::Error;
pub use models::{
    ApplicationStatus, ControllerInfo, LoginResponse, ModelStatus, UnitRunOutput, UnitStatus,
    UserInfo,
};
pub use transport::{TlsMode, TransportConfig};
