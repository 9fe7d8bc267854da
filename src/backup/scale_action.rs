//! Archives deployments scaled down to zero replicas

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::plugin::{item_name, ItemAction, ItemActionOutput, ResourceSelector};

/// Sets `.spec.replicas` to 0 on every backed-up deployment
///
/// Only the archived copy changes; the running deployment keeps its replicas.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScaleDeploymentToZero;

impl ScaleDeploymentToZero {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ItemAction<Backup> for ScaleDeploymentToZero {
    fn applies_to(&self) -> Result<ResourceSelector> {
        Ok(ResourceSelector {
            included_resources: vec!["deployments.apps".to_string()],
            ..Default::default()
        })
    }

    async fn execute(&self, mut item: Value, _backup: &Backup) -> Result<ItemActionOutput> {
        let name = item_name(&item).to_string();
        let Value::Object(object) = &mut item else {
            return Err(Error::execution(format!("deployment {} is not an object", name)));
        };

        let spec = object
            .entry("spec")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(spec) = spec else {
            return Err(Error::execution(format!(
                "error setting .spec.replicas on deployment {}: .spec is not an object",
                name
            )));
        };
        spec.insert("replicas".to_string(), Value::from(0));

        info!(deployment = %name, "Scaled deployment to zero replicas in backup");
        Ok(ItemActionOutput::unchanged(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replicas_are_set_to_zero() {
        let backup = Backup::new("b1", Default::default());
        let deployment = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "ns-1"},
            "spec": {"replicas": 3, "template": {"spec": {"containers": []}}}
        });

        let output = ScaleDeploymentToZero::new().execute(deployment, &backup).await.unwrap();

        assert_eq!(output.item["spec"]["replicas"], 0);
        assert_eq!(output.item["spec"]["template"], json!({"spec": {"containers": []}}));
        assert_eq!(output.item["metadata"]["name"], "web");
        assert!(output.additional_items.is_empty());
        assert!(output.warning.is_none());
    }

    #[tokio::test]
    async fn missing_spec_is_created() {
        let backup = Backup::new("b1", Default::default());

        let output = ScaleDeploymentToZero::new()
            .execute(json!({"metadata": {"name": "web"}}), &backup)
            .await
            .unwrap();

        assert_eq!(output.item["spec"], json!({"replicas": 0}));
    }

    #[tokio::test]
    async fn non_object_spec_is_an_error() {
        let backup = Backup::new("b1", Default::default());

        let result = ScaleDeploymentToZero::new()
            .execute(json!({"metadata": {"name": "web"}, "spec": "broken"}), &backup)
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn applies_only_to_deployments() {
        let selector = ScaleDeploymentToZero::new().applies_to().unwrap();
        let item = json!({"metadata": {"name": "web", "namespace": "ns-1"}});

        assert!(selector.matches("deployments.apps", &item));
        assert!(!selector.matches("statefulsets.apps", &item));
        assert!(!selector.matches("pods", &item));
        assert!(!selector.matches("deployments.extensions", &item));
    }
}
