//! Connection management and the fleet command protocol.
//!
//! - **[`ConnectManager`]** caches one connection per controller. Each
//!   connection is reached through a [`Tunnel`] picked by
//!   [`select_strategy`] (direct, SSH port-forward or sshuttle) and dialed
//!   through [`dial_with_retry`] under the controller's [`RetryPolicy`].
//!
//! - **[`FleetCommand`]** is the three-phase protocol every command
//!   implements: pre-check, dry-run, execute. [`command::run`] drives one
//!   controller and never fails; errors and panics become a failed
//!   [`CommandResult`].
//!
//! - **[`FleetRunner`]** fans a command out serially, in parallel or in
//!   batches and always cleans the manager when it finishes.

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod manager;
pub mod port;
pub mod retry;
pub mod runner;
pub mod strategy;
pub mod tunnel;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{ControllerApi, ControllerHandle, Dialer, HttpDialer};
pub use command::{CommandResult, FleetCommand};
pub use config::{ConnectionConfig, ControllerConfig, ControllerIdentity, RetryPolicy};
pub use error::CoreError;
pub use manager::ConnectManager;
pub use port::get_free_port;
pub use retry::dial_with_retry;
pub use runner::{FleetEntry, FleetResult, FleetRunner, RunMode, RunOptions};
pub use strategy::{DefaultSelector, Strategy, StrategySelector, select_strategy};
pub use tunnel::{Tunnel, TunnelKind};
