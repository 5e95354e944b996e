//! # AzureIdentityBinding Sync
//!
//! Rewrites `spec.azureIdentity` on every AzureIdentityBinding whose lookup
//! labels match a projection, so bindings follow a renamed identity without
//! manual edits. Only the spec field is written; binding labels and
//! annotations are left untouched.

use anyhow::{Context, Result};
use kube::api::ApiResource;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Opts;
use crate::constants::AZURE_IDENTITY_BINDING_KIND;
use crate::kubernetes::validation::validate_label_value;
use crate::kubernetes::{binding_resource, set_nested, DynamicApi};
use crate::observability::metrics;

use super::projection::MsiProjection;

pub struct BindingSync {
    kube: Arc<dyn DynamicApi>,
    opts: Opts,
    resource: ApiResource,
}

impl BindingSync {
    pub fn new(kube: Arc<dyn DynamicApi>, opts: &Opts) -> Self {
        Self {
            kube,
            opts: opts.clone(),
            resource: binding_resource(),
        }
    }

    /// Rebind every matching AzureIdentityBinding in one namespace to the
    /// projection's rendered resource name
    ///
    /// Invalid selector values and list failures abort this rebind with an
    /// error; per-binding write failures are counted and logged but do not
    /// abort the batch.
    pub async fn rebind(&self, projection: &MsiProjection, namespace: &str) -> Result<()> {
        let Some(identity_name) = projection.k8s_resource_name.as_deref() else {
            return Ok(());
        };

        validate_label_value(&projection.subscription_id, "subscription")?;
        validate_label_value(&projection.resource_group, "resourcegroup")?;
        validate_label_value(&projection.resource_name, "name")?;

        let selector = format!(
            "{}={},{}={},{}={}",
            self.opts.label_name("subscription"),
            projection.subscription_id,
            self.opts.label_name("resourcegroup"),
            projection.resource_group,
            self.opts.label_name("name"),
            projection.resource_name,
        );

        let bindings = self
            .kube
            .list(&self.resource, namespace, &selector)
            .await
            .with_context(|| {
                format!("failed to fetch AzureIdentityBinding from namespace {namespace:?}")
            })?;

        for mut binding in bindings {
            let binding_name = binding
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| "<unknown>".to_string());

            if let Err(err) = set_nested(
                &mut binding.data,
                &["spec", "azureIdentity"],
                json!(identity_name),
            ) {
                warn!(
                    namespace = %namespace,
                    binding = %binding_name,
                    error = %err,
                    "failed to set spec.azureIdentity on AzureIdentityBinding"
                );
                continue;
            }

            match self.kube.update(&self.resource, namespace, &binding).await {
                Ok(_) => {
                    info!(
                        namespace = %namespace,
                        binding = %binding_name,
                        identity = %identity_name,
                        "synced AzureIdentity to AzureIdentityBinding"
                    );
                    metrics::record_sync_success(
                        &projection.subscription_id,
                        AZURE_IDENTITY_BINDING_KIND,
                    );
                }
                Err(err) => {
                    warn!(
                        namespace = %namespace,
                        binding = %binding_name,
                        identity = %identity_name,
                        error = %err,
                        "unable to sync AzureIdentity to AzureIdentityBinding"
                    );
                    metrics::record_sync_error(
                        &projection.subscription_id,
                        AZURE_IDENTITY_BINDING_KIND,
                    );
                }
            }
        }

        Ok(())
    }
}
