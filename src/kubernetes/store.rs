// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed access to namespaced objects.
//!
//! Reconcilers only talk to the cluster through [`ObjectStore`] so that they
//! can be exercised against an in-memory store in tests.

use crate::error::{Result, RiffError};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::{debug, instrument};

/// A namespaced Kubernetes object that can round-trip through the API.
pub trait KubeObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> KubeObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ObjectStore<K: KubeObject>: Send + Sync {
    /// Fetch by name, `None` when the object does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects carrying every given label. Order is unspecified.
    async fn list(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<K>>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replace the object, guarded by its resourceVersion
    async fn update(&self, obj: &K) -> Result<K>;

    /// Delete the object, guarded by its UID
    async fn delete(&self, obj: &K) -> Result<()>;

    /// Persist the status subresource, guarded by the object's resourceVersion
    async fn update_status(&self, obj: &K) -> Result<K>;
}

/// Label selector in the `k=v,k=v` form the API server expects
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn object_key<K: KubeObject>(obj: &K) -> Result<(String, String)> {
    let namespace = obj.namespace().ok_or(RiffError::MissingObjectKey(".metadata.namespace"))?;
    let name = obj.meta().name.clone().ok_or(RiffError::MissingObjectKey(".metadata.name"))?;
    Ok((namespace, name))
}

/// [`ObjectStore`] backed by the Kubernetes API server
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: KubeObject> KubeStore<K> {
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K: KubeObject> ObjectStore<K> for KubeStore<K> {
    #[instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    #[instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn list(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self.api(namespace).list(&params).await?;
        debug!(count = list.items.len(), "Listed children");
        Ok(list.items)
    }

    #[instrument(skip(self, obj), fields(kind = %K::kind(&())))]
    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        Ok(self.api(namespace).create(&PostParams::default(), obj).await?)
    }

    #[instrument(skip(self, obj), fields(kind = %K::kind(&()), name = obj.meta().name.as_deref()))]
    async fn update(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        Ok(self
            .api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    #[instrument(skip(self, obj), fields(kind = %K::kind(&()), name = obj.meta().name.as_deref()))]
    async fn delete(&self, obj: &K) -> Result<()> {
        let (namespace, name) = object_key(obj)?;
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                uid: obj.meta().uid.clone(),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };
        self.api(&namespace).delete(&name, &params).await?;
        Ok(())
    }

    #[instrument(skip(self, obj), fields(kind = %K::kind(&()), name = obj.meta().name.as_deref()))]
    async fn update_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        // Full replace so cleared status fields are dropped server side;
        // the carried resourceVersion keeps the write optimistic.
        let data = serde_json::to_vec(obj)?;
        Ok(self
            .api(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{not_found_json, MockService};
    use serde_json::json;
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;

    fn pvc_json(name: &str) -> String {
        json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {
                "name": name,
                "namespace": "default",
                "uid": "pvc-uid",
                "resourceVersion": "7"
            }
        })
        .to_string()
    }

    #[test]
    fn test_label_selector_is_sorted() {
        let labels = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(label_selector(&labels), "a=1,b=2");
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let client = MockService::new()
            .on_get(
                "/api/v1/namespaces/default/persistentvolumeclaims/missing",
                404,
                &not_found_json("persistentvolumeclaims", "missing"),
            )
            .into_client();
        let store: KubeStore<PersistentVolumeClaim> = KubeStore::new(client);

        assert!(store.get("default", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_existing() {
        let client = MockService::new()
            .on_get(
                "/api/v1/namespaces/default/persistentvolumeclaims/cache",
                200,
                &pvc_json("cache"),
            )
            .into_client();
        let store: KubeStore<PersistentVolumeClaim> = KubeStore::new(client);

        let pvc = store.get("default", "cache").await.unwrap().unwrap();
        assert_eq!(pvc.name_any(), "cache");
    }

    #[tokio::test]
    async fn test_delete_sends_uid_precondition() {
        let service = MockService::new().on_delete(
            "/api/v1/namespaces/default/persistentvolumeclaims/cache",
            200,
            &pvc_json("cache"),
        );
        let store: KubeStore<PersistentVolumeClaim> = KubeStore::new(service.clone().into_client());
        let pvc: PersistentVolumeClaim = serde_json::from_str(&pvc_json("cache")).unwrap();

        store.delete(&pvc).await.unwrap();

        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        let (method, _, body) = &requests[0];
        assert_eq!(method, "DELETE");
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["preconditions"]["uid"], "pvc-uid");
    }

    #[tokio::test]
    async fn test_update_status_replaces_whole_status() {
        let service = MockService::new().on_put(
            "/api/v1/namespaces/default/persistentvolumeclaims/cache/status",
            200,
            &pvc_json("cache"),
        );
        let store: KubeStore<PersistentVolumeClaim> = KubeStore::new(service.clone().into_client());
        let mut pvc: PersistentVolumeClaim = serde_json::from_str(&pvc_json("cache")).unwrap();
        pvc.status = Some(Default::default());

        store.update_status(&pvc).await.unwrap();

        let requests = service.requests();
        let (method, path, body) = &requests[0];
        assert_eq!(method, "PUT");
        assert_eq!(path, "/api/v1/namespaces/default/persistentvolumeclaims/cache/status");
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["metadata"]["resourceVersion"], "7");
        assert_eq!(body["metadata"]["name"], "cache");
        assert!(body.get("status").is_some());
    }

    #[tokio::test]
    async fn test_update_status_drops_cleared_fields() {
        use crate::types::function_build::{FunctionBuildSpec, FunctionBuildStatus};
        use crate::types::FunctionBuild;

        let service = MockService::new().on_put(
            "/apis/build.projectriff.io/v1alpha1/namespaces/default/functionbuilds/hello/status",
            200,
            &json!({
                "apiVersion": "build.projectriff.io/v1alpha1",
                "kind": "FunctionBuild",
                "metadata": { "name": "hello", "namespace": "default", "resourceVersion": "8" },
                "spec": { "image": "registry.example.com/hello" }
            })
            .to_string(),
        );
        let store: KubeStore<FunctionBuild> = KubeStore::new(service.clone().into_client());
        let mut build = FunctionBuild::new(
            "hello",
            FunctionBuildSpec {
                image: "registry.example.com/hello".to_string(),
                ..Default::default()
            },
        );
        build.metadata.namespace = Some("default".to_string());
        build.metadata.resource_version = Some("7".to_string());
        build.status = Some(FunctionBuildStatus {
            build_name: Some("hello-build".to_string()),
            build_cache_name: None,
            ..Default::default()
        });

        store.update_status(&build).await.unwrap();

        let requests = service.requests();
        let (method, _, body) = &requests[0];
        assert_eq!(method, "PUT");
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["metadata"]["resourceVersion"], "7");
        assert_eq!(body["status"]["buildName"], "hello-build");
        // Absent from a full replace means cleared on the server
        assert!(body["status"].get("buildCacheName").is_none());
    }

    #[tokio::test]
    async fn test_update_requires_name() {
        let store: KubeStore<PersistentVolumeClaim> = KubeStore::new(MockService::new().into_client());
        let err = store.update(&PersistentVolumeClaim::default()).await.unwrap_err();
        assert!(matches!(err, RiffError::MissingObjectKey(_)));
    }
}
