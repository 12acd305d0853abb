use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::FleetCommand;
use crate::client::ControllerHandle;
use crate::config::ControllerConfig;
use crate::error::CoreError;

/// Controller-level access levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::VariantNames,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Acl {
    Login,
    AddModel,
    Superuser,
}

#[derive(Debug, Clone)]
pub struct Grant {
    pub user: String,
    pub acl: Acl,
}

#[async_trait]
impl FleetCommand for Grant {
    fn name(&self) -> &'static str {
        "grant"
    }

    fn description(&self) -> &'static str {
        "Grant a controller access level to a user"
    }

    fn is_write(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        _config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        let acl = self.acl.to_string();
        let changed = controller.api().grant(&self.user, &acl).await?;
        info!(
            controller = %controller.identity().name,
            user = %self.user,
            %acl,
            changed,
            "access granted"
        );
        Ok(json!({ "user": self.user, "acl": acl, "changed": changed }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use super::*;
    use crate::client::test_support::MockApi;
    use crate::command::tests::handle_for;
    use crate::config::test_support::controller;

    #[test]
    fn acl_names() {
        assert_eq!(Acl::AddModel.to_string(), "add-model");
        assert_eq!(Acl::from_str("superuser").unwrap(), Acl::Superuser);
        assert!(Acl::from_str("admin").is_err());
    }

    #[tokio::test]
    async fn grant_reports_change() {
        let config = controller("prod");
        let handle = handle_for(&config, Arc::new(MockApi::connected()));

        let grant = Grant {
            user: "alice".into(),
            acl: Acl::AddModel,
        };
        let output = grant.execute(&handle, &config).await.unwrap();
        assert_eq!(output, json!({ "user": "alice", "acl": "add-model", "changed": true }));
    }
}
