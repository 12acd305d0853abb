use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::FleetCommand;
use crate::client::ControllerHandle;
use crate::config::ControllerConfig;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShowController;

#[async_trait]
impl FleetCommand for ShowController {
    fn name(&self) -> &'static str {
        "show-controller"
    }

    fn description(&self) -> &'static str {
        "Show controller information"
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        let info = controller.api().info().await?;
        debug!(controller = %controller.identity().name, version = ?info.version, "controller info");
        serde_json::to_value(info).map_err(|e| CoreError::Internal(e.to_string()))
    }
}
