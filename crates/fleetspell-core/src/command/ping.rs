use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::FleetCommand;
use crate::client::ControllerHandle;
use crate::config::ControllerConfig;
use crate::error::CoreError;

/// Reports whether each controller is reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ping;

#[async_trait]
impl FleetCommand for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn description(&self) -> &'static str {
        "Check that the controller accepts connections"
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        let connected = controller.is_connected();
        debug!(controller = %controller.identity().name, connected, "ping");
        Ok(Value::from(if connected { "accessible" } else { "unreachable" }))
    }
}
