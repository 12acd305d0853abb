// Connection strategy selection: which tunnel a controller needs and which
// endpoint the client should dial once it is up.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::port::get_free_port;
use crate::tunnel::Tunnel;

/// A not-yet-connected tunnel plus the endpoint to dial through it.
#[derive(Debug)]
pub struct Strategy {
    pub tunnel: Tunnel,
    pub endpoint: String,
}

/// Chooses the tunnel for a controller. [`ConnectManager`] asks its
/// selector once per connection it establishes.
///
/// [`ConnectManager`]: crate::manager::ConnectManager
#[async_trait]
pub trait StrategySelector: Send + Sync {
    async fn select(
        &self,
        config: &ControllerConfig,
        whole_subnet: bool,
    ) -> Result<Strategy, CoreError>;
}

/// Selection by [`select_strategy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSelector;

#[async_trait]
impl StrategySelector for DefaultSelector {
    async fn select(
        &self,
        config: &ControllerConfig,
        whole_subnet: bool,
    ) -> Result<Strategy, CoreError> {
        select_strategy(config, whole_subnet).await
    }
}

/// Pick the tunnel for `config`.
///
/// - no `connection` → direct to the configured endpoint
/// - `connection` → SSH port-forward from a free local port
/// - `connection` + whole-subnet + subnets → sshuttle, configured endpoint
/// - whole-subnet without subnets → direct, with a warning
pub async fn select_strategy(
    config: &ControllerConfig,
    whole_subnet: bool,
) -> Result<Strategy, CoreError> {
    let Some(connection) = &config.connection else {
        debug!(controller = %config.name, "direct connection");
        return Ok(Strategy {
            tunnel: Tunnel::direct(),
            endpoint: config.endpoint.clone(),
        });
    };

    if whole_subnet {
        return Ok(match connection.subnets() {
            Some(subnets) => {
                debug!(controller = %config.name, ?subnets, "sshuttle connection");
                Strategy {
                    tunnel: Tunnel::sshuttle(
                        subnets.to_vec(),
                        connection.destination.clone(),
                        connection.jumps.clone(),
                    ),
                    endpoint: config.endpoint.clone(),
                }
            }
            None => {
                warn!(
                    controller = %config.name,
                    "whole-subnet access requested but no subnets configured, connecting directly"
                );
                Strategy {
                    tunnel: Tunnel::direct(),
                    endpoint: config.endpoint.clone(),
                }
            }
        });
    }

    let port = get_free_port(connection.port_range.clone()).await?;
    debug!(controller = %config.name, port, "ssh port-forward connection");
    Ok(Strategy {
        tunnel: Tunnel::ssh_port_forward(
            port,
            config.endpoint.clone(),
            connection.destination.clone(),
            connection.jumps.clone(),
        ),
        endpoint: format!("localhost:{port}"),
    })
}
