//! Resource store
//!
//! Point lookups of db-operator resources and status write-back. The
//! controller only sees the [`ResourceStore`] trait; [`KubeResourceStore`]
//! is the implementation backed by the Kubernetes API.

use crate::crd::{Database, DatabaseStatus, ServerConfig, DATABASE_PLURAL, SERVER_CONFIG_PLURAL};
use crate::error::{OperatorError, Result};
use crate::watcher::ResourceMeta;
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Lookup and status write-back for db-operator resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one resource as an untyped document
    ///
    /// Fails with [`OperatorError::NotFound`] when the resource does not exist.
    async fn get(&self, namespace: &str, plural: &str, name: &str) -> Result<Value>;

    /// Replace the status of the Database addressed by `meta`
    ///
    /// Fails with [`OperatorError::NotFound`] when the Database is gone.
    async fn set_status(&self, meta: &ResourceMeta, status: &DatabaseStatus) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str, plural: &str) -> Result<Api<DynamicObject>> {
        let resource = api_resource(plural)?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &resource))
    }
}

fn api_resource(plural: &str) -> Result<ApiResource> {
    match plural {
        DATABASE_PLURAL => Ok(ApiResource::erase::<Database>(&())),
        SERVER_CONFIG_PLURAL => Ok(ApiResource::erase::<ServerConfig>(&())),
        other => Err(OperatorError::Internal(format!(
            "unknown resource kind: {}",
            other
        ))),
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(&self, namespace: &str, plural: &str, name: &str) -> Result<Value> {
        debug!(namespace = %namespace, plural = %plural, name = %name, "Fetching resource");

        match self.api(namespace, plural)?.get(name).await {
            Ok(object) => Ok(serde_json::to_value(&object)?),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(OperatorError::NotFound {
                kind: plural.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(OperatorError::from(e)),
        }
    }

    async fn set_status(&self, meta: &ResourceMeta, status: &DatabaseStatus) -> Result<()> {
        let namespace = meta.namespace.as_deref().ok_or_else(|| {
            OperatorError::Internal(format!("Database {} has no namespace", meta.name))
        })?;

        debug!(name = %meta.name, namespace = %namespace, "Updating database status");

        let result = self
            .api(namespace, DATABASE_PLURAL)?
            .patch_status(
                &meta.name,
                &PatchParams::default(),
                &Patch::Merge(&status_patch(meta, status)),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(OperatorError::NotFound {
                kind: DATABASE_PLURAL.to_string(),
                name: meta.name.clone(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(OperatorError::from(e)),
        }
    }
}

/// Merge patch that replaces the whole status
///
/// Absent fields are sent as `null` so the merge removes them instead of
/// keeping stale values. The resourceVersion makes the API server reject the
/// write when the resource changed since the event was observed.
pub fn status_patch(meta: &ResourceMeta, status: &DatabaseStatus) -> Value {
    let error = status.error.as_ref().map(|e| {
        json!({
            "code": e.code,
            "message": e.message,
        })
    });

    let mut patch = json!({
        "status": {
            "createdName": status.created_name,
            "error": error,
        }
    });

    if let Some(version) = &meta.resource_version {
        patch["metadata"] = json!({ "resourceVersion": version });
    }

    patch
}
