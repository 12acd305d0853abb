// ── Controller client seam ──
//
// Commands and the connection cache talk to controllers through the
// `ControllerApi` trait so tests can substitute in-memory controllers. The
// production implementation is `fleetspell_api::ControllerClient`, created
// by `HttpDialer`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetspell_api::{
    ControllerClient, ControllerInfo, ModelStatus, TransportConfig, UnitRunOutput, UserInfo,
};
use secrecy::SecretString;
use tracing::{debug, warn};

use crate::config::{ControllerConfig, ControllerIdentity};
use crate::error::CoreError;

/// Operations available on a connected controller.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), CoreError>;

    async fn info(&self) -> Result<ControllerInfo, CoreError>;

    async fn list_models(&self) -> Result<Vec<String>, CoreError>;

    async fn model_status(&self, model: &str) -> Result<ModelStatus, CoreError>;

    async fn add_user(
        &self,
        username: &str,
        display_name: Option<&str>,
        password: &SecretString,
    ) -> Result<UserInfo, CoreError>;

    async fn remove_user(&self, username: &str) -> Result<(), CoreError>;

    async fn enable_user(&self, username: &str) -> Result<(), CoreError>;

    async fn disable_user(&self, username: &str) -> Result<(), CoreError>;

    /// Returns whether the grant changed anything.
    async fn grant(&self, username: &str, acl: &str) -> Result<bool, CoreError>;

    async fn run_on_unit(
        &self,
        model: &str,
        unit: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<UnitRunOutput, CoreError>;
}

#[async_trait]
impl ControllerApi for ControllerClient {
    fn is_connected(&self) -> bool {
        ControllerClient::is_connected(self)
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        Ok(self.logout().await?)
    }

    async fn info(&self) -> Result<ControllerInfo, CoreError> {
        Ok(ControllerClient::info(self).await?)
    }

    async fn list_models(&self) -> Result<Vec<String>, CoreError> {
        Ok(ControllerClient::list_models(self).await?)
    }

    async fn model_status(&self, model: &str) -> Result<ModelStatus, CoreError> {
        Ok(ControllerClient::model_status(self, model).await?)
    }

    async fn add_user(
        &self,
        username: &str,
        display_name: Option<&str>,
        password: &SecretString,
    ) -> Result<UserInfo, CoreError> {
        Ok(ControllerClient::add_user(self, username, display_name, password).await?)
    }

    async fn remove_user(&self, username: &str) -> Result<(), CoreError> {
        Ok(ControllerClient::remove_user(self, username).await?)
    }

    async fn enable_user(&self, username: &str) -> Result<(), CoreError> {
        Ok(ControllerClient::enable_user(self, username).await?)
    }

    async fn disable_user(&self, username: &str) -> Result<(), CoreError> {
        Ok(ControllerClient::disable_user(self, username).await?)
    }

    async fn grant(&self, username: &str, acl: &str) -> Result<bool, CoreError> {
        Ok(ControllerClient::grant(self, username, acl).await?)
    }

    async fn run_on_unit(
        &self,
        model: &str,
        unit: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<UnitRunOutput, CoreError> {
        Ok(ControllerClient::run_on_unit(self, model, unit, command, timeout).await?)
    }
}

/// A connected controller together with the identity it was dialed as.
///
/// Cheap to clone; clones share the underlying session.
#[derive(Clone)]
pub struct ControllerHandle {
    identity: ControllerIdentity,
    api: Arc<dyn ControllerApi>,
}

impl ControllerHandle {
    pub fn new(identity: ControllerIdentity, api: Arc<dyn ControllerApi>) -> Self {
        Self { identity, api }
    }

    pub fn identity(&self) -> &ControllerIdentity {
        &self.identity
    }

    pub fn api(&self) -> &Arc<dyn ControllerApi> {
        &self.api
    }

    pub fn is_connected(&self) -> bool {
        self.api.is_connected()
    }

    pub async fn disconnect(&self) -> Result<(), CoreError> {
        self.api.disconnect().await
    }
}

impl fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("identity", &self.identity)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// ── Dialing ──────────────────────────────────────────────────────────

/// One connection attempt to a controller at `endpoint`.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        config: &ControllerConfig,
        endpoint: &str,
    ) -> Result<Arc<dyn ControllerApi>, CoreError>;
}

/// Dials controllers over HTTPS, trusting each controller's CA certificate.
#[derive(Debug, Clone)]
pub struct HttpDialer {
    timeout: Duration,
}

impl HttpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Dialer for HttpDialer {
    async fn dial(
        &self,
        config: &ControllerConfig,
        endpoint: &str,
    ) -> Result<Arc<dyn ControllerApi>, CoreError> {
        let transport = TransportConfig {
            timeout: self.timeout,
            ..TransportConfig::with_ca_cert(config.ca_cert.clone())
        };

        debug!(controller = %config.name, endpoint, "dialing controller");
        let (client, login) =
            ControllerClient::connect(endpoint, &config.user, &config.password, &transport)
                .await?;

        if let Some(uuid) = login.controller_uuid.as_deref() {
            if uuid != config.uuid.to_string() {
                warn!(
                    controller = %config.name,
                    expected = %config.uuid,
                    reported = uuid,
                    "controller reports a different uuid than configured"
                );
            }
        }

        Ok(Arc::new(client))
    }
}

// ── In-memory controllers for tests ──────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    /// Controller double that records disconnects and scripted unit output.
    #[derive(Default)]
    pub struct MockApi {
        pub connected: AtomicBool,
        pub disconnects: AtomicU32,
        pub models: Vec<String>,
        pub statuses: BTreeMap<String, ModelStatus>,
        /// `(model, unit)` → output returned by `run_on_unit`.
        pub unit_output: BTreeMap<(String, String), UnitRunOutput>,
        pub commands: Mutex<Vec<(String, String, String)>>,
        pub users: Mutex<Vec<String>>,
    }

    impl MockApi {
        pub fn connected() -> Self {
            Self {
                connected: AtomicBool::new(true),
                ..Self::default()
            }
        }

        pub fn disconnect_count(&self) -> u32 {
            self.disconnects.load(Ordering::SeqCst)
        }

        pub fn drop_connection(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ControllerApi for MockApi {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) -> Result<(), CoreError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn info(&self) -> Result<ControllerInfo, CoreError> {
            Ok(ControllerInfo {
                uuid: "00000000-0000-0000-0000-000000000000".into(),
                name: "mock".into(),
                version: Some("1.0".into()),
                extra: serde_json::Map::new(),
            })
        }

        async fn list_models(&self) -> Result<Vec<String>, CoreError> {
            Ok(self.models.clone())
        }

        async fn model_status(&self, model: &str) -> Result<ModelStatus, CoreError> {
            self.statuses
                .get(model)
                .cloned()
                .ok_or_else(|| CoreError::Api {
                    message: format!("model {model} not found"),
                    code: Some("not-found".into()),
                    status: Some(404),
                })
        }

        async fn add_user(
            &self,
            username: &str,
            display_name: Option<&str>,
            _password: &SecretString,
        ) -> Result<UserInfo, CoreError> {
            self.users
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(username.to_owned());
            Ok(UserInfo {
                username: username.to_owned(),
                display_name: display_name.map(ToOwned::to_owned),
                disabled: false,
                extra: serde_json::Map::new(),
            })
        }

        async fn remove_user(&self, username: &str) -> Result<(), CoreError> {
            let mut users = self
                .users
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let before = users.len();
            users.retain(|u| u != username);
            if users.len() == before {
                return Err(CoreError::Api {
                    message: format!("user {username} not found"),
                    code: Some("not-found".into()),
                    status: Some(404),
                });
            }
            Ok(())
        }

        async fn enable_user(&self, _username: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn disable_user(&self, _username: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn grant(&self, _username: &str, acl: &str) -> Result<bool, CoreError> {
            Ok(acl != "login")
        }

        async fn run_on_unit(
            &self,
            model: &str,
            unit: &str,
            command: &str,
            _timeout: Duration,
        ) -> Result<UnitRunOutput, CoreError> {
            self.commands
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((model.to_owned(), unit.to_owned(), command.to_owned()));
            Ok(self
                .unit_output
                .get(&(model.to_owned(), unit.to_owned()))
                .cloned()
                .unwrap_or_default())
        }
    }

    /// Dialer handing out fresh [`MockApi`]s and remembering each one.
    #[derive(Default)]
    pub struct MockDialer {
        pub dials: AtomicU32,
        /// Controllers that dial successfully but come back disconnected.
        pub disconnected: HashSet<String>,
        /// Controllers whose endpoint always refuses.
        pub unreachable: HashSet<String>,
        pub apis: Mutex<Vec<(String, Arc<MockApi>)>>,
    }

    impl MockDialer {
        pub fn dial_count(&self) -> u32 {
            self.dials.load(Ordering::SeqCst)
        }

        /// Every API handed out for `name`, oldest first.
        pub fn apis_for(&self, name: &str) -> Vec<Arc<MockApi>> {
            self.apis
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, api)| Arc::clone(api))
                .collect()
        }
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(
            &self,
            config: &ControllerConfig,
            endpoint: &str,
        ) -> Result<Arc<dyn ControllerApi>, CoreError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.contains(&config.name) {
                return Err(CoreError::Unreachable {
                    endpoint: endpoint.to_owned(),
                    reason: "connection refused".into(),
                });
            }

            let api = Arc::new(MockApi::connected());
            if self.disconnected.contains(&config.name) {
                api.drop_connection();
            }
            self.apis
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((config.name.clone(), Arc::clone(&api)));
            Ok(api)
        }
    }
}
