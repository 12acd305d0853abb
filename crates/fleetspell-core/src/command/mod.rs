//! Fleet command protocol.
//!
//! Every command runs against one controller in three phases:
//! [`pre_check`](FleetCommand::pre_check) → [`dry_run`](FleetCommand::dry_run)
//! (preview only) → [`execute`](FleetCommand::execute). [`run`] drives the
//! phases and folds every outcome, panics included, into a
//! [`CommandResult`].

mod grant;
mod ping;
mod show_controller;
mod status;
mod update_packages;
mod users;

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::client::ControllerHandle;
use crate::config::ControllerConfig;
use crate::error::CoreError;

pub use grant::{Acl, Grant};
pub use ping::Ping;
pub use show_controller::ShowController;
pub use status::{Status, selected_models};
pub use update_packages::{
    ApplicationPatch, PackageChange, PackageToUpdate, PatchFile, UnitUpdate, UpdatePackages,
    parse_apt_output,
};
pub use users::{AddUser, DisableUser, EnableUser, RemoveUser, random_password};

/// Outcome of one command on one controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A command that can be fanned out across the fleet.
#[async_trait]
pub trait FleetCommand: Send + Sync {
    /// CLI name, e.g. `add-user`.
    fn name(&self) -> &'static str;

    /// One-line description echoed by the default dry-run.
    fn description(&self) -> &'static str;

    /// Whether the command needs the controller's whole subnet routed
    /// (sshuttle) instead of a single port-forward.
    fn needs_whole_subnet(&self) -> bool {
        false
    }

    /// Whether the command changes controller state.
    fn is_write(&self) -> bool {
        false
    }

    /// `Some(failure)` stops the command before it runs.
    async fn pre_check(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Option<CommandResult> {
        default_pre_check(controller)
    }

    /// Side-effect free preview of what `execute` would do.
    async fn dry_run(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> CommandResult {
        info!(controller = %controller.identity().name, command = self.name(), "dry-run");
        CommandResult::ok(json!({
            "target": controller.identity().uuid,
            "command": self.name(),
            "description": self.description(),
        }))
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        config: &ControllerConfig,
    ) -> Result<Value, CoreError>;
}

/// Fails when the controller handle is no longer connected.
pub fn default_pre_check(controller: &ControllerHandle) -> Option<CommandResult> {
    if controller.is_connected() {
        return None;
    }
    let identity = controller.identity();
    info!(controller = %identity.name, "pre-check failed: not connected");
    Some(CommandResult::failure(format!(
        "controller {} ({}) is not connected",
        identity.name, identity.uuid
    )))
}

/// Drive the protocol for one controller. Never returns an error and never
/// unwinds: failures and panics become a failed [`CommandResult`].
pub async fn run(
    command: &dyn FleetCommand,
    controller: &ControllerHandle,
    config: &ControllerConfig,
    preview: bool,
) -> CommandResult {
    let name = &controller.identity().name;
    debug!(controller = %name, command = command.name(), preview, "running command");

    let phases = async {
        if let Some(failure) = command.pre_check(controller, config).await {
            return failure;
        }
        if preview {
            return command.dry_run(controller, config).await;
        }
        match command.execute(controller, config).await {
            Ok(output) => CommandResult::ok(output),
            Err(e) => {
                warn!(controller = %name, command = command.name(), error = %e, "command failed");
                CommandResult::failure(e.to_string())
            }
        }
    };

    match AssertUnwindSafe(phases).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(controller = %name, command = command.name(), %message, "command panicked");
            CommandResult::failure(format!("command panicked: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
