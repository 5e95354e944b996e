//! # ARM Client
//!
//! Azure Resource Manager REST client for subscription resolution and
//! paginated listing of user-assigned managed identities.
//!
//! Authentication uses ambient environment credentials via
//! `DefaultAzureCredential`; requests carry a bearer token for the
//! management-plane scope of the configured cloud.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use azure_core::credentials::{TokenCredential, TokenRequestOptions};
use azure_identity::DefaultAzureCredential;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{ARM_MSI_API_VERSION, ARM_SUBSCRIPTIONS_API_VERSION};

use super::{CloudEnvironment, ManagedIdentity, MsiSource, Subscription};

/// One page of an ARM list response
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

pub struct ArmClient {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    cloud: CloudEnvironment,
    configured_subscriptions: Vec<String>,
}

impl ArmClient {
    pub fn new(cloud: CloudEnvironment, configured_subscriptions: Vec<String>) -> Result<Self> {
        let credential: Arc<dyn TokenCredential> = DefaultAzureCredential::new()
            .context("failed to build Azure credential from environment")?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("azure-msi-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            credential,
            cloud,
            configured_subscriptions,
        })
    }

    async fn get_token(&self) -> Result<String> {
        let scope = self.cloud.token_scope();
        let token = self
            .credential
            .get_token(&[scope.as_str()], Some(TokenRequestOptions::default()))
            .await
            .context("failed to get Azure management access token")?;
        Ok(token.token.secret().to_string())
    }

    /// GET a single ARM resource
    async fn get_one<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.get_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("ARM request to {url} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("ARM request to {url} returned {status}: {body}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode ARM response from {url}"))
    }

    /// GET an ARM collection, following `nextLink` pagination
    ///
    /// Only the first page surfaces an error. A failure on a continuation
    /// page stops the iteration and returns what was collected so far.
    async fn get_all_pages<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>> {
        let first: Page<T> = self.get_one(&first_url).await?;
        let mut items = first.value;
        let mut next_url = first.next_link;

        while let Some(url) = next_url {
            debug!(url = %url, "fetching ARM continuation page");
            match self.get_one::<Page<T>>(&url).await {
                Ok(page) => {
                    items.extend(page.value);
                    next_url = page.next_link;
                }
                Err(err) => {
                    warn!(error = %err, "failed to fetch ARM continuation page, returning partial result");
                    break;
                }
            }
        }

        Ok(items)
    }

    fn endpoint(&self) -> &str {
        self.cloud.resource_manager_endpoint
    }
}

#[async_trait]
impl MsiSource for ArmClient {
    async fn resolve_subscriptions(&self) -> Result<Vec<Subscription>> {
        if self.configured_subscriptions.is_empty() {
            let url = format!(
                "{}/subscriptions?api-version={}",
                self.endpoint(),
                ARM_SUBSCRIPTIONS_API_VERSION
            );
            let subscriptions: Vec<Subscription> = self.get_all_pages(url).await?;

            if subscriptions.is_empty() {
                bail!("no Azure subscriptions found via auto detection, does this principal have read permission on the subscriptions?");
            }

            return Ok(subscriptions);
        }

        let mut subscriptions = Vec::with_capacity(self.configured_subscriptions.len());
        for subscription_id in &self.configured_subscriptions {
            let url = format!(
                "{}/subscriptions/{}?api-version={}",
                self.endpoint(),
                subscription_id,
                ARM_SUBSCRIPTIONS_API_VERSION
            );
            let subscription = self
                .get_one(&url)
                .await
                .with_context(|| format!("failed to get Azure subscription {subscription_id}"))?;
            subscriptions.push(subscription);
        }

        Ok(subscriptions)
    }

    async fn list_identities(&self, subscription: &Subscription) -> Result<Vec<ManagedIdentity>> {
        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities?api-version={}",
            self.endpoint(),
            subscription.subscription_id,
            ARM_MSI_API_VERSION
        );

        self.get_all_pages(url).await.with_context(|| {
            format!(
                "failed to list managed identities in subscription {}",
                subscription.subscription_id
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_deserialization() {
        let body = r#"{
            "value": [
                {"id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/a", "name": "a"}
            ],
            "nextLink": "https://management.azure.com/next"
        }"#;
        let page: Page<ManagedIdentity> = serde_json::from_str(body).unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.value[0].name, "a");
        assert_eq!(page.next_link.as_deref(), Some("https://management.azure.com/next"));
    }

    #[test]
    fn test_last_page_has_no_next_link() {
        let body = r#"{"value": []}"#;
        let page: Page<ManagedIdentity> = serde_json::from_str(body).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }

    #[test]
    fn test_identity_deserialization() {
        let body = r#"{
            "id": "/subscriptions/S/resourceGroups/RG/providers/Microsoft.ManagedIdentity/userAssignedIdentities/foo",
            "name": "foo",
            "location": "westeurope",
            "type": "Microsoft.ManagedIdentity/userAssignedIdentities",
            "tags": {"k8snamespace": "app"},
            "properties": {
                "tenantId": "tenant",
                "principalId": "principal",
                "clientId": "client"
            }
        }"#;
        let identity: ManagedIdentity = serde_json::from_str(body).unwrap();
        assert_eq!(identity.name, "foo");
        assert_eq!(identity.properties.client_id, "client");
        assert_eq!(identity.tags.get("k8snamespace").map(String::as_str), Some("app"));
    }
}
