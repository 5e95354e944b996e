//! # Operator
//!
//! The reconciliation engine: service discovery of managed identities across
//! subscriptions, projection into Kubernetes targets, and the concurrent
//! upsert pipeline.
//!
//! Two guards serialize the work. `run_guard` admits at most one discovery
//! cycle; `upsert_guard` admits at most one upsert and stays closed for
//! `sync.locktime` after an upsert completes, so a storm of watch events
//! collapses into a single delayed upsert instead of hammering the
//! apiserver. Triggers that lose a guard are dropped, not queued; the next
//! interval tick or watch event catches up.

use anyhow::Result;
use futures::TryStreamExt;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::core::DynamicObject;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::azure::{ArmClient, CloudEnvironment, MsiSource, Subscription};
use crate::config::Opts;
use crate::constants::LEADER_BOOTSTRAP_DELAY_SECS;
use crate::kubernetes::{
    binding_resource, build_client, namespace_resource, DynamicApi, KubeDynamicClient,
};
use crate::observability::metrics;

pub mod backoff;
pub mod binding_sync;
pub mod identity_sync;
pub mod leader;
pub mod msi_list;
pub mod projection;

use backoff::WatchBackoff;
use binding_sync::BindingSync;
use identity_sync::IdentitySync;
use leader::LeaderElector;
use msi_list::MsiResourceList;
use projection::TemplateRenderer;

pub struct MsiOperator {
    opts: Opts,
    source: Arc<dyn MsiSource>,
    renderer: TemplateRenderer,
    subscriptions: Vec<Subscription>,
    identities: MsiResourceList,
    identity_sync: IdentitySync,
    binding_sync: BindingSync,
    run_guard: Semaphore,
    upsert_guard: Arc<Semaphore>,
    watch_client: Option<kube::Client>,
}

impl MsiOperator {
    /// Build the operator against the real Azure and Kubernetes backends
    pub async fn new(opts: Opts) -> Result<Self> {
        let cloud = CloudEnvironment::from_name(&opts.azure_environment)?;
        let source = Arc::new(ArmClient::new(cloud, opts.azure_subscription.clone())?);

        let client = build_client(opts.kubernetes_config.as_deref()).await?;
        let kube = Arc::new(KubeDynamicClient::new(client.clone()));

        Self::with_backends(opts, source, kube, Some(client)).await
    }

    /// Build the operator with explicit backends; used directly by tests
    pub async fn with_backends(
        opts: Opts,
        source: Arc<dyn MsiSource>,
        kube: Arc<dyn DynamicApi>,
        watch_client: Option<kube::Client>,
    ) -> Result<Self> {
        let renderer = TemplateRenderer::new(&opts.template_resource_name, &opts.template_namespace)?;

        let subscriptions = source.resolve_subscriptions().await?;
        info!(count = subscriptions.len(), "resolved Azure subscriptions");

        let identity_sync = IdentitySync::new(kube.clone(), &opts);
        let binding_sync = BindingSync::new(kube, &opts);

        Ok(Self {
            opts,
            source,
            renderer,
            subscriptions,
            identities: MsiResourceList::new(),
            identity_sync,
            binding_sync,
            run_guard: Semaphore::new(1),
            upsert_guard: Arc::new(Semaphore::new(1)),
            watch_client,
        })
    }

    /// Start the trigger sources in the background: after the leader gate,
    /// run one immediate cycle, then the interval ticker and, if enabled,
    /// the two watches
    pub fn start(self: &Arc<Self>) {
        let operator = self.clone();
        tokio::spawn(async move {
            operator.leader_gate().await;

            operator.run_cycle().await;
            operator.clone().start_interval_sync();

            if operator.opts.sync_watch {
                operator.clone().start_watch_sync();
            }
        });
    }

    /// Block until this instance holds the leader lease, when enabled
    async fn leader_gate(&self) {
        if !self.opts.lease_enabled {
            return;
        }

        let Some(client) = self.watch_client.clone() else {
            warn!("leader election requires a cluster connection, skipping");
            return;
        };

        // let the apiserver endpoints settle after pod start
        tokio::time::sleep(Duration::from_secs(LEADER_BOOTSTRAP_DELAY_SECS)).await;

        let identity = self.leader_identity();
        let namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string());

        let elector = Arc::new(LeaderElector::new(
            client,
            &self.opts.lease_name,
            &namespace,
            &identity,
        ));
        elector.acquire().await;
    }

    fn leader_identity(&self) -> String {
        self.opts
            .instance_pod
            .clone()
            .or_else(|| std::env::var("POD_NAME").ok())
            .unwrap_or_else(|| format!("azure-msi-operator-{}", std::process::id()))
    }

    /// One full reconciliation cycle: discovery, commit, cluster-wide upsert
    ///
    /// Returns silently when another cycle is already running.
    pub async fn run_cycle(&self) {
        let Ok(_permit) = self.run_guard.try_acquire() else {
            return;
        };

        info!("starting service discovery");
        let started = Instant::now();

        if let Err(err) = self.discover().await {
            error!(error = %err, "service discovery failed, keeping previous snapshot");
            return;
        }

        self.upsert("", true, true).await;

        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            "sync cycle finished"
        );
    }

    /// Refresh the identity list from Azure
    ///
    /// Any subscription listing failure aborts without commit; the previous
    /// snapshot stays in force. Projection failures for single identities
    /// are logged and skipped.
    async fn discover(&self) -> Result<()> {
        self.identities.clean();

        for subscription in &self.subscriptions {
            let started = Instant::now();
            let display_name = subscription
                .display_name
                .as_deref()
                .unwrap_or(&subscription.subscription_id);

            info!(
                subscription = %display_name,
                subscription_id = %subscription.subscription_id,
                "running MSI service discovery in subscription"
            );

            let identities = self.source.list_identities(subscription).await?;

            for msi in identities {
                match self
                    .renderer
                    .project(&msi, &self.opts.kubernetes_namespace_ignore)
                {
                    Ok(projection) => self.identities.add(projection),
                    Err(err) => {
                        warn!(resource = %msi.id, error = %err, "skipping identity, projection failed")
                    }
                }
            }

            metrics::set_sync_duration(
                &subscription.subscription_id,
                started.elapsed().as_secs_f64(),
            );
            metrics::set_sync_time_now(&subscription.subscription_id);
        }

        self.identities.commit();

        Ok(())
    }

    /// Upsert all committed projections, optionally restricted to one
    /// namespace and to one of the two sync kinds
    ///
    /// Returns `false` without side effects when another upsert is running
    /// or its cooldown has not elapsed. On completion the guard is released
    /// only after `sync.locktime`.
    pub async fn upsert(
        &self,
        namespace_filter: &str,
        sync_identity: bool,
        sync_binding: bool,
    ) -> bool {
        let Ok(permit) = self.upsert_guard.try_acquire() else {
            return false;
        };
        permit.forget();

        if namespace_filter.is_empty() {
            info!("starting upsert for cluster");
        } else {
            info!(namespace = namespace_filter, "starting upsert for namespace");
        }

        for projection in self.identities.get_list().iter() {
            let Some(resource_name) = projection.k8s_resource_name.as_deref() else {
                debug!(
                    resource = %projection.resource_id,
                    "no Kubernetes resource name rendered, skipping"
                );
                continue;
            };

            for namespace in &projection.k8s_namespaces {
                if !namespace_filter.is_empty() && namespace.as_str() != namespace_filter {
                    continue;
                }

                if sync_identity {
                    debug!(namespace = %namespace, resource = %resource_name, "syncing AzureIdentity");
                    if let Err(err) = self.identity_sync.apply(projection, namespace).await {
                        error!(
                            namespace = %namespace,
                            resource = %resource_name,
                            error = %err,
                            "failed to sync AzureIdentity"
                        );
                    }
                }

                if sync_binding && self.opts.binding_sync {
                    debug!(namespace = %namespace, resource = %resource_name, "syncing AzureIdentityBinding");
                    if let Err(err) = self.binding_sync.rebind(projection, namespace).await {
                        error!(
                            namespace = %namespace,
                            resource = %resource_name,
                            error = %err,
                            "failed to sync AzureIdentityBinding"
                        );
                    }
                }
            }
        }

        // trailing cooldown: hold the guard closed for sync.locktime
        let guard = self.upsert_guard.clone();
        let lock_time = self.opts.sync_lock_time;
        tokio::spawn(async move {
            tokio::time::sleep(lock_time).await;
            guard.add_permits(1);
        });

        true
    }

    fn start_interval_sync(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.opts.sync_interval).await;
                self.run_cycle().await;
            }
        });
    }

    fn start_watch_sync(self: Arc<Self>) {
        let Some(client) = self.watch_client.clone() else {
            warn!("watch triggers require a cluster connection, skipping");
            return;
        };

        self.clone().start_namespace_watch(client.clone());
        self.start_binding_watch(client);
    }

    /// Watch namespaces; an added namespace gets an identity-only upsert so
    /// identities tagged for it appear without waiting for the next cycle
    fn start_namespace_watch(self: Arc<Self>, client: kube::Client) {
        tokio::spawn(async move {
            let resource = namespace_resource();
            let mut backoff = WatchBackoff::new();

            loop {
                let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
                let stream = match api.watch(&WatchParams::default(), "0").await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(error = %err, "failed to open namespace watch");
                        tokio::time::sleep(backoff.next_delay()).await;
                        continue;
                    }
                };

                futures::pin_mut!(stream);
                loop {
                    match stream.try_next().await {
                        Ok(Some(WatchEvent::Added(object))) => {
                            backoff.note_healthy();
                            if let Some(namespace) = object.metadata.name.as_deref() {
                                if !namespace.is_empty() {
                                    self.upsert(namespace, true, false).await;
                                }
                            }
                        }
                        Ok(Some(WatchEvent::Error(err))) => {
                            warn!(error = %err, "namespace watch error event");
                            break;
                        }
                        Ok(Some(_)) => backoff.note_healthy(),
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "namespace watch stream failed");
                            break;
                        }
                    }
                }

                info!("restarting namespace watch");
                tokio::time::sleep(backoff.next_delay()).await;
            }
        });
    }

    /// Watch AzureIdentityBinding; added or modified bindings get a
    /// binding-only upsert for their namespace
    fn start_binding_watch(self: Arc<Self>, client: kube::Client) {
        tokio::spawn(async move {
            let resource = binding_resource();
            let mut backoff = WatchBackoff::new();

            loop {
                let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
                let stream = match api.watch(&WatchParams::default(), "0").await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(error = %err, "failed to open AzureIdentityBinding watch");
                        tokio::time::sleep(backoff.next_delay()).await;
                        continue;
                    }
                };

                futures::pin_mut!(stream);
                loop {
                    match stream.try_next().await {
                        Ok(Some(WatchEvent::Added(object)))
                        | Ok(Some(WatchEvent::Modified(object))) => {
                            backoff.note_healthy();
                            if let Some(namespace) = object.metadata.namespace.as_deref() {
                                if !namespace.is_empty() {
                                    self.upsert(namespace, false, true).await;
                                }
                            }
                        }
                        Ok(Some(WatchEvent::Error(err))) => {
                            warn!(error = %err, "AzureIdentityBinding watch error event");
                            break;
                        }
                        Ok(Some(_)) => backoff.note_healthy(),
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "AzureIdentityBinding watch stream failed");
                            break;
                        }
                    }
                }

                info!("restarting AzureIdentityBinding watch");
                tokio::time::sleep(backoff.next_delay()).await;
            }
        });
    }

    /// Committed projection snapshot, exposed for tests and introspection
    pub fn identity_snapshot(&self) -> Arc<Vec<projection::MsiProjection>> {
        self.identities.get_list()
    }
}
