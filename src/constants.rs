//! # Constants
//!
//! Shared constants used throughout the operator.

/// API group of the AzureIdentity and AzureIdentityBinding custom resources
pub const AAD_POD_IDENTITY_GROUP: &str = "aadpodidentity.k8s.io";

/// API version of the AzureIdentity and AzureIdentityBinding custom resources
pub const AAD_POD_IDENTITY_VERSION: &str = "v1";

/// AzureIdentity kind
pub const AZURE_IDENTITY_KIND: &str = "AzureIdentity";

/// AzureIdentityBinding kind
pub const AZURE_IDENTITY_BINDING_KIND: &str = "AzureIdentityBinding";

/// Annotation controlling aad-pod-identity namespaced matching behavior
pub const BEHAVIOR_ANNOTATION: &str = "aadpodidentity.k8s.io/Behavior";

/// Value of the behavior annotation when namespaced matching is enabled
pub const BEHAVIOR_NAMESPACED: &str = "namespaced";

/// Delay before the first lease acquisition attempt, giving the apiserver
/// endpoints time to settle after pod start
pub const LEADER_BOOTSTRAP_DELAY_SECS: u64 = 15;

/// Watch reconnect backoff starting value (seconds)
pub const WATCH_BACKOFF_MIN_SECS: u64 = 1;

/// Watch reconnect backoff maximum value (seconds)
pub const WATCH_BACKOFF_MAX_SECS: u64 = 60;

/// ARM API version for subscription operations
pub const ARM_SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";

/// ARM API version for user-assigned identity operations
pub const ARM_MSI_API_VERSION: &str = "2023-01-31";
