// ── Fleet runner ──
//
// Fans one command out across a list of controllers. Per-controller
// failures (connection, pre-check, execution) are recorded in the result
// list; only configuration errors and cancellation abort the run. The
// connection manager is cleaned exactly once when the run ends, whichever
// way it ends.

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::{self, CommandResult, FleetCommand};
use crate::config::{ControllerConfig, ControllerIdentity};
use crate::error::CoreError;
use crate::manager::ConnectManager;

/// How controllers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RunMode {
    /// One controller at a time, in order.
    #[default]
    Serial,
    /// Up to `limit` controllers at once.
    Parallel { limit: usize },
    /// Chunks of `size` controllers; each chunk runs concurrently and must
    /// finish before the next starts.
    Batch { size: usize },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Run the dry-run phase instead of executing.
    pub dry_run: bool,
    /// Drop cached connections and dial every controller anew.
    pub force_reconnect: bool,
}

/// One controller's entry in a fleet result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetEntry {
    pub context: ControllerIdentity,
    #[serde(flatten)]
    pub result: CommandResult,
}

/// Results in controller input order.
pub type FleetResult = Vec<FleetEntry>;

pub struct FleetRunner<'a> {
    manager: &'a ConnectManager,
    cancel: CancellationToken,
}

impl<'a> FleetRunner<'a> {
    pub fn new(manager: &'a ConnectManager) -> Self {
        Self {
            manager,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing work and tear down tunnels once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `command` on every controller according to `options.mode`.
    pub async fn run(
        &self,
        controllers: &[ControllerConfig],
        command: &dyn FleetCommand,
        options: &RunOptions,
    ) -> Result<FleetResult, CoreError> {
        info!(
            command = command.name(),
            controllers = controllers.len(),
            mode = %options.mode,
            dry_run = options.dry_run,
            "starting fleet run"
        );

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                warn!(command = command.name(), "run cancelled, cleaning up");
                Err(CoreError::Cancelled)
            }
            outcome = self.dispatch(controllers, command, options) => outcome,
        };

        self.manager.clean().await;
        outcome
    }

    /// [`run`](Self::run) in [`RunMode::Serial`].
    pub async fn run_serial(
        &self,
        controllers: &[ControllerConfig],
        command: &dyn FleetCommand,
        dry_run: bool,
    ) -> Result<FleetResult, CoreError> {
        let options = RunOptions {
            mode: RunMode::Serial,
            dry_run,
            force_reconnect: false,
        };
        self.run(controllers, command, &options).await
    }

    async fn dispatch(
        &self,
        controllers: &[ControllerConfig],
        command: &dyn FleetCommand,
        options: &RunOptions,
    ) -> Result<FleetResult, CoreError> {
        match options.mode {
            RunMode::Serial => {
                let mut results = Vec::with_capacity(controllers.len());
                for config in controllers {
                    results.push(self.run_one(config, command, options).await?);
                }
                Ok(results)
            }
            RunMode::Parallel { limit } => {
                futures::stream::iter(controllers)
                    .map(|config| self.run_one(config, command, options))
                    .buffered(limit.max(1))
                    .try_collect()
                    .await
            }
            RunMode::Batch { size } => {
                let mut results = Vec::with_capacity(controllers.len());
                for chunk in controllers.chunks(size.max(1)) {
                    let batch = futures::future::try_join_all(
                        chunk
                            .iter()
                            .map(|config| self.run_one(config, command, options)),
                    )
                    .await?;
                    results.extend(batch);
                }
                Ok(results)
            }
        }
    }

    async fn run_one(
        &self,
        config: &ControllerConfig,
        command: &dyn FleetCommand,
        options: &RunOptions,
    ) -> Result<FleetEntry, CoreError> {
        let result = match self
            .manager
            .get_controller(config, command.needs_whole_subnet(), options.force_reconnect)
            .await
        {
            Ok(controller) => command::run(command, &controller, config, options.dry_run).await,
            Err(e) if e.aborts_run() => return Err(e),
            Err(e) => {
                warn!(controller = %config.name, error = %e, "could not connect");
                CommandResult::failure(e.to_string())
            }
        };

        Ok(FleetEntry {
            context: config.identity(),
            result,
        })
    }
}
