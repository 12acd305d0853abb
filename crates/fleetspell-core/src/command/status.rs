use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::FleetCommand;
use crate::client::{ControllerApi, ControllerHandle};
use crate::config::ControllerConfig;
use crate::error::CoreError;

/// Status of the selected models on each controller.
#[derive(Debug, Clone, Default)]
pub struct Status {
    /// Model names or `model_mapping` aliases. Empty means all models.
    pub models: Vec<String>,
}

/// Resolve the models a command should act on: the requested ones expanded
/// through `model_mapping`, or every model on the controller.
pub async fn selected_models(
    api: &dyn ControllerApi,
    config: &ControllerConfig,
    requested: &[String],
) -> Result<Vec<String>, CoreError> {
    if requested.is_empty() {
        api.list_models().await
    } else {
        Ok(config.expand_models(requested))
    }
}

#[async_trait]
impl FleetCommand for Status {
    fn name(&self) -> &'static str {
        "status"
    }

    fn description(&self) -> &'static str {
        "Show the status of models on the controller"
    }

    async fn execute(
        &self,
        controller: &ControllerHandle,
        config: &ControllerConfig,
    ) -> Result<Value, CoreError> {
        let api = controller.api().as_ref();
        let mut output = Map::new();

        for model in selected_models(api, config, &self.models).await? {
            let status = api.model_status(&model).await?;
            debug!(
                controller = %config.name,
                model = %model,
                applications = status.applications.len(),
                "model status"
            );
            let status = serde_json::to_value(status).map_err(|e| CoreError::Internal(e.to_string()))?;
            output.insert(model, status);
        }

        Ok(Value::Object(output))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use fleetspell_api::ModelStatus;
    use serde_json::json;

    use super::*;
    use crate::client::test_support::MockApi;
    use crate::command::tests::handle_for;
    use crate::config::test_support::controller;

    fn model(name: &str) -> ModelStatus {
        serde_json::from_value(json!({ "name": name, "applications": {} })).unwrap()
    }

    fn api() -> MockApi {
        MockApi {
            models: vec!["controller".into(), "openstack".into()],
            statuses: BTreeMap::from([
                ("controller".into(), model("controller")),
                ("openstack".into(), model("openstack")),
                ("lma".into(), model("lma")),
            ]),
            ..MockApi::connected()
        }
    }

    #[tokio::test]
    async fn no_models_means_all_models() {
        let config = controller("prod");
        let handle = handle_for(&config, Arc::new(api()));

        let output = Status::default().execute(&handle, &config).await.unwrap();
        let keys: Vec<&String> = output.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["controller", "openstack"]);
    }

    #[tokio::test]
    async fn aliases_expand_through_model_mapping() {
        let mut config = controller("prod");
        config
            .model_mapping
            .insert("monitoring".into(), vec!["lma".into()]);
        let handle = handle_for(&config, Arc::new(api()));

        let status = Status {
            models: vec!["monitoring".into(), "openstack".into()],
        };
        let output = status.execute(&handle, &config).await.unwrap();
        assert_eq!(output["lma"]["name"], "lma");
        assert_eq!(output["openstack"]["name"], "openstack");
        assert!(output.get("monitoring").is_none());
    }

    #[tokio::test]
    async fn unknown_model_fails_the_controller() {
        let config = controller("prod");
        let handle = handle_for(&config, Arc::new(api()));

        let status = Status {
            models: vec!["missing".into()],
        };
        let err = status.execute(&handle, &config).await.unwrap_err();
        assert!(matches!(err, CoreError::Api { status: Some(404), .. }));
    }
}
