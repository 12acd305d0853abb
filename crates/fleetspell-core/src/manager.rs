// ── Connection cache ──
//
// Maps controller name → {handle, tunnel}. Each name has its own slot lock,
// so get-or-create is atomic per controller while different controllers
// connect concurrently. Only the cache entry that owns a tunnel terminates
// it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{ControllerHandle, Dialer, HttpDialer};
use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::retry::dial_with_retry;
use crate::strategy::{DefaultSelector, Strategy, StrategySelector};
use crate::tunnel::Tunnel;

struct CachedConnection {
    handle: ControllerHandle,
    tunnel: Tunnel,
}

impl CachedConnection {
    fn is_alive(&mut self) -> bool {
        self.handle.is_connected() && self.tunnel.is_connected()
    }

    /// Disconnect the handle, then terminate the tunnel. Never fails.
    async fn close(mut self) {
        let name = &self.handle.identity().name;
        if let Err(e) = self.handle.disconnect().await {
            warn!(controller = %name, error = %e, "failed to disconnect controller");
        }
        self.tunnel.clean().await;
        debug!(controller = %name, "connection closed");
    }
}

type Slot = Arc<Mutex<Option<CachedConnection>>>;

/// Owns every controller connection and tunnel opened during a run.
///
/// Constructed by the caller and passed to the
/// [`FleetRunner`](crate::runner::FleetRunner); call [`clean`](Self::clean)
/// when done.
pub struct ConnectManager {
    dialer: Arc<dyn Dialer>,
    selector: Arc<dyn StrategySelector>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ConnectManager {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            selector: Arc::new(DefaultSelector),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Replace how tunnels are chosen for new connections.
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn StrategySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Manager dialing real controllers over HTTPS.
    pub fn http() -> Self {
        Self::new(Arc::new(HttpDialer::default()))
    }

    /// Return a connected handle for `config`, reusing a live cached one.
    ///
    /// A cached connection is replaced when it is stale (handle or tunnel
    /// gone) or when `force_reconnect` is set; the predecessor is always
    /// disconnected and its tunnel terminated first.
    pub async fn get_controller(
        &self,
        config: &ControllerConfig,
        whole_subnet: bool,
        force_reconnect: bool,
    ) -> Result<ControllerHandle, CoreError> {
        config.validate()?;

        let slot = self.slot(&config.name).await;
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_mut() {
            if !force_reconnect && cached.is_alive() {
                debug!(controller = %config.name, "reusing cached connection");
                return Ok(cached.handle.clone());
            }
            info!(
                controller = %config.name,
                reason = if force_reconnect { "forced" } else { "stale" },
                "replacing cached connection"
            );
        }
        if let Some(previous) = entry.take() {
            previous.close().await;
        }

        let connection = self.establish(config, whole_subnet).await?;
        let handle = connection.handle.clone();
        *entry = Some(connection);
        Ok(handle)
    }

    /// Select a strategy, start its tunnel and dial with retry. The tunnel
    /// is terminated again if the dial fails.
    async fn establish(
        &self,
        config: &ControllerConfig,
        whole_subnet: bool,
    ) -> Result<CachedConnection, CoreError> {
        let Strategy {
            mut tunnel,
            endpoint,
        } = self.selector.select(config, whole_subnet).await?;

        info!(controller = %config.name, %tunnel, %endpoint, "connecting");
        tunnel.connect()?;

        let identity = config.identity();
        let dialed = dial_with_retry(&identity, &config.retry_policy(), || {
            self.dialer.dial(config, &endpoint)
        })
        .await;

        match dialed {
            Ok(api) => Ok(CachedConnection {
                handle: ControllerHandle::new(identity, api),
                tunnel,
            }),
            Err(e) => {
                tunnel.clean().await;
                Err(e)
            }
        }
    }

    /// Disconnect every handle, terminate every tunnel and empty the cache.
    ///
    /// Failures are logged and skipped. Safe to call repeatedly.
    pub async fn clean(&self) {
        let slots: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        if slots.is_empty() {
            return;
        }

        debug!(count = slots.len(), "cleaning connections");
        for (name, slot) in slots {
            if let Some(connection) = slot.lock().await.take() {
                connection.close().await;
            } else {
                debug!(controller = %name, "slot already empty");
            }
        }
    }

    /// Number of cached connections.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, name: &str) -> Slot {
        Arc::clone(
            self.slots
                .lock()
                .await
                .entry(name.to_owned())
                .or_default(),
        )
    }
}
