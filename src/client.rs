//! API access seams used by the reconcilers
//!
//! Reconcilers read through an [`ObjectLister`] (backed by a reflector cache in
//! production) and write through [`BackupClient`] / [`RestoreClient`], so the
//! processing logic can be driven by in-memory fakes in tests.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::reflector::{ObjectRef, Store},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::crd::{Backup, Restore};
use crate::error::{Error, Result};

/// Read access to cached objects
pub trait ObjectLister<K>: Send + Sync {
    /// Look up an object; `Ok(None)` means it does not exist
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>>;
}

impl<K> ObjectLister<K> for Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>> {
        Ok(Store::get(self, &ObjectRef::new(name).within(namespace)))
    }
}

/// Write access to Backup objects
#[async_trait]
pub trait BackupClient: Send + Sync {
    /// Apply a merge patch to the object `original` was read as
    async fn patch(&self, original: &Backup, patch: &Value) -> Result<Backup>;

    /// Create a Backup in `namespace`
    async fn create(&self, namespace: &str, backup: &Backup) -> Result<Backup>;
}

/// Write access to Restore objects
#[async_trait]
pub trait RestoreClient: Send + Sync {
    /// Apply a merge patch to the object `original` was read as
    async fn patch(&self, original: &Restore, patch: &Value) -> Result<Restore>;
}

/// Kubernetes-backed implementation of the write seams
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Send a merge patch, routing `status` through the status subresource
    ///
    /// Each request carries the resource version it was computed against, so a
    /// concurrent writer makes the patch fail with a conflict instead of being
    /// silently overwritten.
    async fn patch_object<K>(&self, original: &K, patch: &Value) -> Result<K>
    where
        K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned
            + Serialize,
    {
        let namespace = original.namespace().unwrap_or_default();
        let name = original.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        let (status, rest) = split_status(patch);
        let mut resource_version = original.resource_version();
        let mut latest = None;

        if let Some(rest) = rest {
            debug!(name = %name, "Patching object");
            let body = with_resource_version(rest, resource_version.as_deref());
            let updated = api.patch(&name, &PatchParams::default(), &Patch::Merge(&body)).await?;
            resource_version = updated.resource_version();
            latest = Some(updated);
        }

        if let Some(status) = status {
            debug!(name = %name, "Patching status");
            let body = with_resource_version(status, resource_version.as_deref());
            let updated = api
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&body))
                .await?;
            latest = Some(updated);
        }

        Ok(latest.unwrap_or_else(|| original.clone()))
    }
}

/// Split a patch into its `status` part and everything else
fn split_status(patch: &Value) -> (Option<Value>, Option<Value>) {
    let Value::Object(map) = patch else {
        return (None, Some(patch.clone()));
    };

    let mut rest = map.clone();
    let status = rest.remove("status").map(|status| {
        let mut body = Map::new();
        body.insert("status".to_string(), status);
        Value::Object(body)
    });

    let rest = (!rest.is_empty()).then_some(Value::Object(rest));
    (status, rest)
}

fn with_resource_version(mut body: Value, resource_version: Option<&str>) -> Value {
    let (Some(rv), Value::Object(map)) = (resource_version, &mut body) else {
        return body;
    };
    let metadata = map
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(metadata) = metadata {
        metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
    }
    body
}

#[async_trait]
impl BackupClient for KubeApiClient {
    async fn patch(&self, original: &Backup, patch: &Value) -> Result<Backup> {
        self.patch_object(original, patch).await
    }

    async fn create(&self, namespace: &str, backup: &Backup) -> Result<Backup> {
        let api: Api<Backup> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), backup).await.map_err(Error::from)
    }
}

#[async_trait]
impl RestoreClient for KubeApiClient {
    async fn patch(&self, original: &Restore, patch: &Value) -> Result<Restore> {
        self.patch_object(original, patch).await
    }
}
