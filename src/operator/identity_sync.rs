//! # AzureIdentity Sync
//!
//! Renders an AzureIdentity body from a projection and upserts it:
//! GET then UPDATE when present, CREATE when absent. Last-write-wins; the
//! operator is the intended single writer, gated by leader election.

use anyhow::{Context, Result};
use chrono::Utc;
use kube::api::ApiResource;
use kube::core::{DynamicObject, TypeMeta};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Opts;
use crate::constants::{
    AAD_POD_IDENTITY_GROUP, AAD_POD_IDENTITY_VERSION, AZURE_IDENTITY_KIND, BEHAVIOR_ANNOTATION,
    BEHAVIOR_NAMESPACED,
};
use crate::kubernetes::{identity_resource, set_nested, DynamicApi};
use crate::observability::metrics;

use super::projection::MsiProjection;

pub struct IdentitySync {
    kube: Arc<dyn DynamicApi>,
    opts: Opts,
    resource: ApiResource,
}

impl IdentitySync {
    pub fn new(kube: Arc<dyn DynamicApi>, opts: &Opts) -> Self {
        Self {
            kube,
            opts: opts.clone(),
            resource: identity_resource(),
        }
    }

    /// Upsert the AzureIdentity for one projection into one namespace
    ///
    /// Write failures are counted and logged but do not abort the caller's
    /// loop; only body-rendering failures surface as errors.
    pub async fn apply(&self, projection: &MsiProjection, namespace: &str) -> Result<()> {
        let Some(name) = projection.k8s_resource_name.as_deref() else {
            return Ok(());
        };

        let existing = match self.kube.get(&self.resource, namespace, name).await {
            Ok(existing) => existing,
            Err(err) => {
                warn!(namespace = %namespace, resource = %name, error = %err, "failed to get AzureIdentity");
                metrics::record_sync_error(&projection.subscription_id, AZURE_IDENTITY_KIND);
                return Ok(());
            }
        };

        match existing {
            Some(mut object) => {
                self.render_into(projection, &mut object)?;

                info!(namespace = %namespace, resource = %name, "updating AzureIdentity");
                match self.kube.update(&self.resource, namespace, &object).await {
                    Ok(_) => {
                        metrics::record_sync_success(&projection.subscription_id, AZURE_IDENTITY_KIND)
                    }
                    Err(err) => {
                        warn!(namespace = %namespace, resource = %name, error = %err, "failed to update AzureIdentity");
                        metrics::record_sync_error(&projection.subscription_id, AZURE_IDENTITY_KIND);
                    }
                }
            }
            None => {
                let mut object = DynamicObject::new(name, &self.resource);
                self.render_into(projection, &mut object)?;

                info!(namespace = %namespace, resource = %name, "creating AzureIdentity");
                match self.kube.create(&self.resource, namespace, &object).await {
                    Ok(_) => {
                        metrics::record_sync_success(&projection.subscription_id, AZURE_IDENTITY_KIND)
                    }
                    Err(err) => {
                        warn!(namespace = %namespace, resource = %name, error = %err, "failed to create AzureIdentity");
                        metrics::record_sync_error(&projection.subscription_id, AZURE_IDENTITY_KIND);
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply the projected fields onto an unstructured AzureIdentity body,
    /// deterministically: type meta, spec, behavior annotation, expiry
    /// annotation, lookup labels.
    pub fn render_into(&self, projection: &MsiProjection, object: &mut DynamicObject) -> Result<()> {
        object.types = Some(TypeMeta {
            api_version: format!("{AAD_POD_IDENTITY_GROUP}/{AAD_POD_IDENTITY_VERSION}"),
            kind: AZURE_IDENTITY_KIND.to_string(),
        });

        set_nested(&mut object.data, &["spec", "type"], json!(0))
            .context("failed to set spec.type")?;
        set_nested(
            &mut object.data,
            &["spec", "resourceID"],
            json!(projection.resource_id),
        )
        .context("failed to set spec.resourceID")?;
        set_nested(
            &mut object.data,
            &["spec", "clientID"],
            json!(projection.client_id),
        )
        .context("failed to set spec.clientID")?;

        let annotations = object.metadata.annotations.get_or_insert_with(Default::default);
        if self.opts.azure_msi_namespaced {
            annotations.insert(
                BEHAVIOR_ANNOTATION.to_string(),
                BEHAVIOR_NAMESPACED.to_string(),
            );
        } else {
            // do not leave a stale value from an earlier namespaced run
            annotations.remove(BEHAVIOR_ANNOTATION);
        }

        if self.opts.expiry_enable {
            let ttl = chrono::Duration::from_std(self.opts.expiry_duration)
                .context("expiry duration out of range")?;
            let expiry_date = (Utc::now() + ttl)
                .format(&self.opts.expiry_time_format)
                .to_string();
            annotations.insert(self.opts.expiry_annotation.clone(), expiry_date);
        }

        let labels = object.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(
            self.opts.label_name("subscription"),
            projection.subscription_id.clone(),
        );
        labels.insert(
            self.opts.label_name("resourcegroup"),
            projection.resource_group.clone(),
        );
        labels.insert(self.opts.label_name("name"), projection.resource_name.clone());

        debug!(resource = %projection.resource_id, "rendered AzureIdentity body");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use clap::Parser;

    struct NoopApi;

    #[async_trait]
    impl DynamicApi for NoopApi {
        async fn get(&self, _: &ApiResource, _: &str, _: &str) -> Result<Option<DynamicObject>> {
            Err(anyhow!("not used"))
        }
        async fn list(&self, _: &ApiResource, _: &str, _: &str) -> Result<Vec<DynamicObject>> {
            Err(anyhow!("not used"))
        }
        async fn create(&self, _: &ApiResource, _: &str, _: &DynamicObject) -> Result<DynamicObject> {
            Err(anyhow!("not used"))
        }
        async fn update(&self, _: &ApiResource, _: &str, _: &DynamicObject) -> Result<DynamicObject> {
            Err(anyhow!("not used"))
        }
    }

    fn sync(args: &[&str]) -> IdentitySync {
        let mut argv = vec!["azure-msi-operator"];
        argv.extend_from_slice(args);
        let opts = Opts::try_parse_from(argv).expect("test options should parse");
        IdentitySync::new(Arc::new(NoopApi), &opts)
    }

    fn projection() -> MsiProjection {
        MsiProjection {
            resource_id: "/subscriptions/sub/resourcegroups/rg/providers/microsoft.managedidentity/userassignedidentities/foo".to_string(),
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            resource_name: "foo".to_string(),
            client_id: "client-id".to_string(),
            k8s_resource_name: Some("foo-client-id".to_string()),
            ..MsiProjection::default()
        }
    }

    #[test]
    fn test_rendered_spec_fields() {
        let sync = sync(&[]);
        let mut object = DynamicObject::new("foo-client-id", &identity_resource());
        sync.render_into(&projection(), &mut object).unwrap();

        // spec.type is the integer 0, not a string
        assert_eq!(object.data["spec"]["type"], json!(0));
        assert_eq!(
            object.data["spec"]["resourceID"],
            json!("/subscriptions/sub/resourcegroups/rg/providers/microsoft.managedidentity/userassignedidentities/foo")
        );
        assert_eq!(object.data["spec"]["clientID"], json!("client-id"));

        let types = object.types.as_ref().unwrap();
        assert_eq!(types.api_version, "aadpodidentity.k8s.io/v1");
        assert_eq!(types.kind, "AzureIdentity");
    }

    #[test]
    fn test_lookup_labels() {
        let sync = sync(&[]);
        let mut object = DynamicObject::new("foo-client-id", &identity_resource());
        sync.render_into(&projection(), &mut object).unwrap();

        let labels = object.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("azure.k8s.io/subscription").map(String::as_str), Some("sub"));
        assert_eq!(labels.get("azure.k8s.io/resourcegroup").map(String::as_str), Some("rg"));
        assert_eq!(labels.get("azure.k8s.io/name").map(String::as_str), Some("foo"));
    }

    #[test]
    fn test_namespaced_annotation_set_and_removed() {
        let namespaced = sync(&["--azuremsi.namespaced"]);
        let mut object = DynamicObject::new("foo-client-id", &identity_resource());
        namespaced.render_into(&projection(), &mut object).unwrap();
        assert_eq!(
            object
                .metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(BEHAVIOR_ANNOTATION)
                .map(String::as_str),
            Some("namespaced")
        );

        // toggling off must remove the stale annotation from the same object
        let flat = sync(&[]);
        flat.render_into(&projection(), &mut object).unwrap();
        assert!(!object
            .metadata
            .annotations
            .as_ref()
            .unwrap()
            .contains_key(BEHAVIOR_ANNOTATION));
    }

    #[test]
    fn test_expiry_annotation() {
        let sync = sync(&[
            "--azuremsi.expiry.enable",
            "--azuremsi.expiry.duration",
            "1h",
        ]);
        let mut object = DynamicObject::new("foo-client-id", &identity_resource());
        sync.render_into(&projection(), &mut object).unwrap();

        let annotations = object.metadata.annotations.as_ref().unwrap();
        let expiry = annotations
            .get("aadpodidentity.k8s.io/expiry")
            .expect("expiry annotation should be set");
        let parsed = chrono::NaiveDateTime::parse_from_str(expiry, "%Y-%m-%dT%H:%M:%SZ")
            .expect("expiry should match the configured format");
        assert!(parsed.and_utc() > Utc::now());
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let sync = sync(&["--azuremsi.namespaced"]);
        let mut object = DynamicObject::new("foo-client-id", &identity_resource());
        sync.render_into(&projection(), &mut object).unwrap();
        let first = serde_json::to_value(&object).unwrap();

        sync.render_into(&projection(), &mut object).unwrap();
        let second = serde_json::to_value(&object).unwrap();

        assert_eq!(first, second);
    }
}
