//! # Azure
//!
//! Azure management-plane access: cloud environment selection, resource-ID
//! handling and service discovery of user-assigned managed identities.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod arm;
pub mod cloud;
pub mod resource_id;

pub use arm::ArmClient;
pub use cloud::CloudEnvironment;
pub use resource_id::ResourceId;

/// An Azure subscription as returned by ARM
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub id: Option<String>,
    pub subscription_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A user-assigned managed identity as returned by ARM
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedIdentity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "type", default)]
    pub identity_type: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: ManagedIdentityProperties,
}

/// The identity's data-plane properties
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedIdentityProperties {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub principal_id: String,
    #[serde(default)]
    pub client_id: String,
}

/// Service discovery source for managed identities
///
/// Implemented by [`ArmClient`] against the ARM REST API and by in-memory
/// fakes in tests.
#[async_trait]
pub trait MsiSource: Send + Sync {
    /// Resolve the subscription set: the configured list, or every readable
    /// subscription when none is configured. An empty result is an error.
    async fn resolve_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// List all user-assigned identities in one subscription, following
    /// pagination. Only the initial request failing is an error; a failure
    /// on a later page stops the listing and returns the identities
    /// collected so far.
    async fn list_identities(&self, subscription: &Subscription) -> Result<Vec<ManagedIdentity>>;
}
