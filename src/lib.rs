//! # Azure MSI Operator
//!
//! A Kubernetes operator that projects Azure User-Assigned Managed
//! Identities as `AzureIdentity` custom resources in the
//! `aadpodidentity.k8s.io` group, so workloads can consume Azure identities
//! declared and tagged in Azure itself.
//!
//! ## Overview
//!
//! 1. **Service discovery** - lists managed identities across the configured
//!    (or auto-detected) subscriptions via the ARM API
//! 2. **Projection** - two templates map each identity to a Kubernetes
//!    resource name and a set of target namespaces, driven by Azure tags
//! 3. **Upsert** - each projection is written as an `AzureIdentity` into its
//!    target namespaces; existing resources are updated in place
//! 4. **Binding sync** - optionally rewrites `spec.azureIdentity` on every
//!    `AzureIdentityBinding` matching an identity's lookup labels
//! 5. **Triggers** - a periodic cycle plus optional namespace and binding
//!    watches, serialized by drop-on-contention guards with an upsert
//!    cooldown
//!
//! The operator only upserts; stale resources are left to downstream
//! janitors guided by the optional expiry annotation.

pub mod azure;
pub mod config;
pub mod constants;
pub mod kubernetes;
pub mod observability;
pub mod operator;
pub mod server;
