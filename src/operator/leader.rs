//! # Leader Election
//!
//! Leader election using Kubernetes Leases (`coordination.k8s.io/v1`).
//!
//! The operator is a single-writer system: only the leader runs triggers and
//! touches the cluster. Acquisition blocks until the lease is held; a
//! background task renews it afterwards. Split-brain is prevented by timing:
//! the lease duration exceeds the renew interval, so a displaced leader
//! notices the loss before a new leader can take over the expired lease.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const FIELD_MANAGER: &str = "azure-msi-operator";

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Lease-based leader elector
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until leadership is acquired, then keep renewing in a
    /// background task. Losing the lease later terminates the process:
    /// a deposed leader must not keep writing.
    pub async fn acquire(self: Arc<Self>) {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "trying to become leader"
        );

        loop {
            match self.try_acquire_lease().await {
                Ok(true) => {
                    info!(identity = %self.identity, "acquired leader lock, continuing");
                    break;
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        retry_secs = RETRY_INTERVAL.as_secs(),
                        "lease held by another instance, waiting"
                    );
                }
                Err(err) => {
                    warn!(
                        identity = %self.identity,
                        error = %err,
                        retry_secs = RETRY_INTERVAL.as_secs(),
                        "failed to acquire lease, retrying"
                    );
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        let elector = Arc::clone(&self);
        tokio::spawn(async move {
            elector.renewal_loop().await;
        });
    }

    /// Try to acquire or renew the lease once
    async fn try_acquire_lease(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        match api.get(&self.lease_name).await {
            Ok(lease) => {
                let spec = lease.spec.as_ref();
                let holder = spec.and_then(|s| s.holder_identity.as_ref());

                if holder == Some(&self.identity) {
                    return self.renew_lease(&api, now).await;
                }

                let renew_time = spec.and_then(|s| s.renew_time.as_ref());
                let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
                let is_expired = match (renew_time, duration_secs) {
                    (Some(renewed), Some(duration)) => {
                        now > renewed.0 + chrono::Duration::seconds(duration as i64)
                    }
                    _ => true,
                };

                if is_expired {
                    let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
                    self.take_over_lease(&api, now, transitions).await
                } else {
                    Ok(false)
                }
            }
            Err(kube::Error::Api(err)) if err.code == 404 => self.create_lease(&api, now).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn create_lease(
        &self,
        api: &Api<Lease>,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "created new lease");
                Ok(true)
            }
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        now: chrono::DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        let patch = serde_json::json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {
                "name": self.lease_name,
                "namespace": self.namespace,
            },
            "spec": {
                "renewTime": MicroTime(now),
            }
        });

        api.patch(
            &self.lease_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&patch),
        )
        .await?;

        debug!(identity = %self.identity, "lease renewed");
        Ok(true)
    }

    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        now: chrono::DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool, LeaderElectionError> {
        let patch = serde_json::json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {
                "name": self.lease_name,
                "namespace": self.namespace,
            },
            "spec": {
                "holderIdentity": self.identity,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION.as_secs() as i32,
                "leaseTransitions": transitions + 1,
            }
        });

        match api
            .patch(
                &self.lease_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await
        {
            Ok(_) => {
                info!(
                    identity = %self.identity,
                    transitions = transitions + 1,
                    "took over expired lease"
                );
                Ok(true)
            }
            Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn renewal_loop(&self) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;

            match self.try_acquire_lease().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    error!(identity = %self.identity, "lost leader lease, terminating");
                    std::process::exit(1);
                }
            }
        }
    }
}
