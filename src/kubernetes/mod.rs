//! # Kubernetes
//!
//! Dynamic (unstructured) access to the apiserver.
//!
//! The operator writes custom resources it has no typed bindings for, so all
//! CRUD goes through [`kube::core::DynamicObject`] addressed by an
//! [`ApiResource`]. The [`DynamicApi`] trait is the seam between the sync
//! engine and the cluster; tests substitute an in-memory implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, ListParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};

use crate::constants::{
    AAD_POD_IDENTITY_GROUP, AAD_POD_IDENTITY_VERSION, AZURE_IDENTITY_BINDING_KIND,
    AZURE_IDENTITY_KIND,
};

pub mod validation;

/// ApiResource for `aadpodidentity.k8s.io/v1` AzureIdentity
pub fn identity_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        AAD_POD_IDENTITY_GROUP,
        AAD_POD_IDENTITY_VERSION,
        AZURE_IDENTITY_KIND,
    ))
}

/// ApiResource for `aadpodidentity.k8s.io/v1` AzureIdentityBinding
pub fn binding_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        AAD_POD_IDENTITY_GROUP,
        AAD_POD_IDENTITY_VERSION,
        AZURE_IDENTITY_BINDING_KIND,
    ))
}

/// ApiResource for core `v1` Namespace
pub fn namespace_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("", "v1", "Namespace"))
}

/// Dynamic CRUD over unstructured objects, scoped by resource and namespace
#[async_trait]
pub trait DynamicApi: Send + Sync {
    /// GET by name; `Ok(None)` when the object does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// LIST by label selector
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>>;

    /// CREATE a new object
    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// UPDATE (replace) an existing object
    async fn update(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;
}

/// [`DynamicApi`] backed by a real cluster connection
#[derive(Clone)]
pub struct KubeDynamicClient {
    client: kube::Client,
}

impl KubeDynamicClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl DynamicApi for KubeDynamicClient {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        match self.api(resource, namespace).get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api(resource, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        Ok(self
            .api(resource, namespace)
            .create(&PostParams::default(), object)
            .await?)
    }

    async fn update(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object
            .metadata
            .name
            .as_deref()
            .context("cannot update an object without a name")?;
        Ok(self
            .api(resource, namespace)
            .replace(name, &PostParams::default(), object)
            .await?)
    }
}

/// Build a cluster client: from an explicit kubeconfig path when configured,
/// otherwise in-cluster credentials or the default kubeconfig.
pub async fn build_client(kubeconfig_path: Option<&str>) -> Result<kube::Client> {
    match kubeconfig_path {
        Some(path) if !path.is_empty() => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig from {path}"))?;
            let config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await
            .context("failed to load kubeconfig")?;
            Ok(kube::Client::try_from(config)?)
        }
        _ => kube::Client::try_default()
            .await
            .context("failed to build in-cluster Kubernetes client"),
    }
}

/// Set a value at a nested path inside an unstructured body, creating
/// intermediate objects as needed. Fails if an intermediate value exists and
/// is not an object.
pub fn set_nested(
    root: &mut serde_json::Value,
    path: &[&str],
    value: serde_json::Value,
) -> Result<()> {
    let (last, parents) = path.split_last().context("empty field path")?;

    if root.is_null() {
        *root = serde_json::Value::Object(Default::default());
    }

    let mut current = root;
    for key in parents {
        let object = current
            .as_object_mut()
            .with_context(|| format!("value at {key:?} is not an object"))?;
        current = object
            .entry(key.to_string())
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
    }

    let object = current
        .as_object_mut()
        .with_context(|| format!("value at {last:?} is not an object"))?;
    object.insert(last.to_string(), value);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_resource_gvr() {
        let resource = identity_resource();
        assert_eq!(resource.group, "aadpodidentity.k8s.io");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.kind, "AzureIdentity");
        assert_eq!(resource.plural, "azureidentities");
    }

    #[test]
    fn test_binding_resource_gvr() {
        let resource = binding_resource();
        assert_eq!(resource.kind, "AzureIdentityBinding");
        assert_eq!(resource.plural, "azureidentitybindings");
    }

    #[test]
    fn test_namespace_resource_gvr() {
        let resource = namespace_resource();
        assert_eq!(resource.api_version, "v1");
        assert_eq!(resource.plural, "namespaces");
    }

    #[test]
    fn test_set_nested_creates_intermediates() {
        let mut body = serde_json::Value::Null;
        set_nested(&mut body, &["spec", "resourceID"], json!("/subscriptions/s")).unwrap();
        assert_eq!(body["spec"]["resourceID"], json!("/subscriptions/s"));
    }

    #[test]
    fn test_set_nested_overwrites_leaf() {
        let mut body = json!({"spec": {"type": 1}});
        set_nested(&mut body, &["spec", "type"], json!(0)).unwrap();
        assert_eq!(body["spec"]["type"], json!(0));
    }

    #[test]
    fn test_set_nested_rejects_non_object_intermediate() {
        let mut body = json!({"spec": "scalar"});
        assert!(set_nested(&mut body, &["spec", "type"], json!(0)).is_err());
    }
}
