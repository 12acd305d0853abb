// User management commands: add, remove, enable and disable controller
// users.

use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::info;

use super::FleetCommand;
use crate::client::ControllerHandle;
use crate::config::ControllerConfig;
use crate::error::CoreError;

const GENERATED_PASSWORD_LEN: usize = 24;

/// Random alphanumeric password of `len` characters.
pub fn random_password(len: usize) -> SecretString {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    SecretString::from(password)
}

#[derive(Debug)]
pub struct AddUser {
    pub user: String,
    pub display_name: Option<String>,
    /// `None` or empty generates a random password per controller.
    pub password: Option<SecretString>,
}

#[async_trait]
impl FleetCommand for AddUser {
    fn name(&self) -> &'static str {
        "add-user"
    }

    fn description(&self) -> &'static str {
        "Create a user on the controller"
    }

    fn is_write(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        let password = match &self.password {
            Some(password) if !password.expose_secret().is_empty() => {
                SecretString::from(password.expose_secret().to_owned())
            }
            _ => random_password(GENERATED_PASSWORD_LEN),
        };

        let user = controller
            .api()
            .add_user(&self.user, self.display_name.as_deref(), &password)
            .await?;
        info!(controller = %controller.identity().name, user = %user.username, "user added");

        Ok(json!({
            "user": user.username,
            "display_name": user.display_name,
            "password": password.expose_secret(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct RemoveUser {
    pub user: String,
}

#[async_trait]
impl FleetCommand for RemoveUser {
    fn name(&self) -> &'static str {
        "remove-user"
    }

    fn description(&self) -> &'static str {
        "Remove a user from the controller"
    }

    fn is_write(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        controller.api().remove_user(&self.user).await?;
        info!(controller = %controller.identity().name, user = %self.user, "user removed");
        Ok(Value::from(format!("user `{}` was successfully removed", self.user)))
    }
}

#[derive(Debug, Clone)]
pub struct EnableUser {
    pub user: String,
}

#[async_trait]
impl FleetCommand for EnableUser {
    fn name(&self) -> &'static str {
        "enable-user"
    }

    fn description(&self) -> &'static str {
        "Enable a disabled controller user"
    }

    fn is_write(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        controller.api().enable_user(&self.user).await?;
        info!(controller = %controller.identity().name, user = %self.user, "user enabled");
        Ok(Value::from(format!("user `{}` was enabled", self.user)))
    }
}

#[derive(Debug, Clone)]
pub struct DisableUser {
    pub user: String,
}

#[async_trait]
impl FleetCommand for DisableUser {
    fn name(&self) -> &'static str {
        "disable-user"
    }

    fn description(&self) -> &'static str {
        "Disable a controller user without removing it"
    }

    fn is_write(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        controller.api().disable_user(&self.user).await?;
        info!(controller = %controller.identity().name, user = %self.user, "user disabled");
        Ok(Value::from(format!("user `{}` was disabled", self.user)))
    }
}
