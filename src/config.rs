//! # Configuration
//!
//! Command-line and environment configuration for the operator.
//!
//! Every option is exposed as a long flag with an environment variable
//! fallback, so the operator can be configured either way in a deployment.
//! Durations accept humantime notation (`1h`, `5m`, `30s`).

use clap::Parser;
use std::time::Duration;

/// Azure MSI operator options
///
/// Read-only after startup; cloned into the components that need it.
#[derive(Parser, Debug, Clone)]
#[command(name = "azure-msi-operator", version, about = "Projects Azure User-Assigned Managed Identities as AzureIdentity custom resources", long_about = None)]
pub struct Opts {
    /// Debug mode (trace-level logging)
    #[arg(long = "debug", env = "DEBUG")]
    pub debug: bool,

    /// Verbose mode (debug-level logging)
    #[arg(short = 'v', long = "verbose", env = "VERBOSE")]
    pub verbose: bool,

    /// Switch log output to JSON format
    #[arg(long = "log.json", env = "LOG_JSON")]
    pub log_json: bool,

    /// Sync interval between full reconciliation cycles
    #[arg(long = "sync.interval", env = "SYNC_INTERVAL", default_value = "1h", value_parser = humantime::parse_duration)]
    pub sync_interval: Duration,

    /// Lock time until the next upsert may start after one completes
    #[arg(long = "sync.locktime", env = "SYNC_LOCKTIME", default_value = "5m", value_parser = humantime::parse_duration)]
    pub sync_lock_time: Duration,

    /// Enable watch-driven triggers (namespace and AzureIdentityBinding watches)
    #[arg(long = "sync.watch", env = "SYNC_WATCH")]
    pub sync_watch: bool,

    /// Azure subscription IDs; empty means auto-detect all readable subscriptions
    #[arg(long = "azure.subscription", env = "AZURE_SUBSCRIPTION_ID", value_delimiter = ' ')]
    pub azure_subscription: Vec<String>,

    /// Azure cloud environment name
    #[arg(long = "azure.environment", env = "AZURE_ENVIRONMENT", default_value = "AzurePublicCloud")]
    pub azure_environment: String,

    /// Kubernetes config path (should be empty if in-cluster)
    #[arg(long = "kubeconfig", env = "KUBECONFIG")]
    pub kubernetes_config: Option<String>,

    /// Kubernetes label key format (sprintf-style, `%s` is replaced by the suffix)
    #[arg(long = "kubernetes.label.format", env = "KUBERNETES_LABEL_FORMAT", default_value = "azure.k8s.io/%s")]
    pub kubernetes_label_format: String,

    /// Namespaces filtered out of rendered namespace lists
    #[arg(long = "kubernetes.namespace.ignore", env = "KUBERNETES_NAMESPACE_IGNORE", value_delimiter = ' ')]
    pub kubernetes_namespace_ignore: Vec<String>,

    /// Set the aadpodidentity.k8s.io/Behavior=namespaced annotation on AzureIdentity resources
    #[arg(long = "azuremsi.namespaced", env = "AZUREMSI_NAMESPACED")]
    pub azure_msi_namespaced: bool,

    /// Template rendered to the Kubernetes namespace list (comma-separated)
    #[arg(long = "azuremsi.template.namespace", env = "AZUREMSI_TEMPLATE_NAMESPACE", default_value = "{{ Tags.k8snamespace }}")]
    pub template_namespace: String,

    /// Template rendered to the Kubernetes resource name
    #[arg(long = "azuremsi.template.resourcename", env = "AZUREMSI_TEMPLATE_RESOURCENAME", default_value = "{{ Name }}-{{ ClientId }}")]
    pub template_resource_name: String,

    /// Rewrite matching AzureIdentityBinding resources via lookup labels
    #[arg(long = "azuremsi.binding.sync", env = "AZUREMSI_BINDING_SYNC")]
    pub binding_sync: bool,

    /// Set a TTL annotation on AzureIdentity resources for downstream janitors
    #[arg(long = "azuremsi.expiry.enable", env = "AZUREMSI_EXPIRY_ENABLE")]
    pub expiry_enable: bool,

    /// Annotation key carrying the expiry timestamp
    #[arg(long = "azuremsi.expiry.annotation", env = "AZUREMSI_EXPIRY_ANNOTATION", default_value = "aadpodidentity.k8s.io/expiry")]
    pub expiry_annotation: String,

    /// Time-to-live added to the current time for the expiry annotation
    #[arg(long = "azuremsi.expiry.duration", env = "AZUREMSI_EXPIRY_DURATION", default_value = "24h", value_parser = humantime::parse_duration)]
    pub expiry_duration: Duration,

    /// chrono format string for the expiry timestamp (rendered in UTC)
    #[arg(long = "azuremsi.expiry.timeformat", env = "AZUREMSI_EXPIRY_TIMEFORMAT", default_value = "%Y-%m-%dT%H:%M:%SZ")]
    pub expiry_time_format: String,

    /// Enable leader election via a coordination.k8s.io Lease
    #[arg(long = "lease.enable", env = "LEASE_ENABLE")]
    pub lease_enabled: bool,

    /// Name of the leader election lease
    #[arg(long = "lease.name", env = "LEASE_NAME", default_value = "azure-msi-operator")]
    pub lease_name: String,

    /// Pod name used as the leader lock identity
    #[arg(long = "instance.pod", env = "POD_NAME")]
    pub instance_pod: Option<String>,

    /// HTTP server bind address for health probes and metrics
    #[arg(long = "bind", env = "SERVER_BIND", default_value = "0.0.0.0:8080")]
    pub server_bind: String,
}

impl Opts {
    /// Expand the configured label format with a suffix token,
    /// e.g. `azure.k8s.io/%s` + `subscription` -> `azure.k8s.io/subscription`.
    pub fn label_name(&self, suffix: &str) -> String {
        self.kubernetes_label_format.replace("%s", suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Opts {
        Opts::try_parse_from(["azure-msi-operator"]).expect("defaults should parse")
    }

    #[test]
    fn test_default_values() {
        let opts = defaults();
        assert_eq!(opts.sync_interval, Duration::from_secs(3600));
        assert_eq!(opts.sync_lock_time, Duration::from_secs(300));
        assert_eq!(opts.kubernetes_label_format, "azure.k8s.io/%s");
        assert_eq!(opts.template_resource_name, "{{ Name }}-{{ ClientId }}");
        assert_eq!(opts.template_namespace, "{{ Tags.k8snamespace }}");
        assert_eq!(opts.server_bind, "0.0.0.0:8080");
        assert!(!opts.sync_watch);
        assert!(!opts.binding_sync);
        assert!(!opts.lease_enabled);
        assert!(opts.azure_subscription.is_empty());
    }

    #[test]
    fn test_label_name_format() {
        let opts = defaults();
        assert_eq!(opts.label_name("subscription"), "azure.k8s.io/subscription");
        assert_eq!(opts.label_name("resourcegroup"), "azure.k8s.io/resourcegroup");
        assert_eq!(opts.label_name("name"), "azure.k8s.io/name");
    }

    #[test]
    fn test_namespace_ignore_list_splits_on_spaces() {
        let opts = Opts::try_parse_from([
            "azure-msi-operator",
            "--kubernetes.namespace.ignore",
            "kube-system kube-public",
        ])
        .expect("ignore list should parse");
        assert_eq!(opts.kubernetes_namespace_ignore, vec!["kube-system", "kube-public"]);
    }

    #[test]
    fn test_duration_notation() {
        let opts = Opts::try_parse_from([
            "azure-msi-operator",
            "--sync.interval",
            "30m",
            "--sync.locktime",
            "45s",
        ])
        .expect("durations should parse");
        assert_eq!(opts.sync_interval, Duration::from_secs(1800));
        assert_eq!(opts.sync_lock_time, Duration::from_secs(45));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Opts::try_parse_from(["azure-msi-operator", "--no-such-flag"]).is_err());
    }
}
