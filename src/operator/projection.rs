//! # Identity Projection
//!
//! The mapping from one managed identity to its intended place in the
//! cluster: a resource name and a set of target namespaces, both produced by
//! configurable templates rendered against the identity's fields and tags.

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, Value};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::azure::{ManagedIdentity, ResourceId};

const RESOURCE_NAME_TEMPLATE: &str = "resource-name";
const NAMESPACE_TEMPLATE: &str = "namespace";

/// One discovered identity and its rendered Kubernetes targets
///
/// Azure identifier fields are lowercased at construction; tag keys keep
/// their casing from Azure.
#[derive(Debug, Clone, Default)]
pub struct MsiProjection {
    pub resource_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub resource_name: String,
    pub client_id: String,
    pub tenant_id: String,
    pub principal_id: String,
    pub tags: BTreeMap<String, String>,
    /// Rendered Kubernetes resource name; `None` when the template produced
    /// an empty string
    pub k8s_resource_name: Option<String>,
    /// Rendered target namespaces, lowercased, ignore-filtered, order and
    /// duplicates preserved as rendered
    pub k8s_namespaces: Vec<String>,
    /// The source identity record, kept for re-rendering
    pub raw: ManagedIdentity,
}

/// Render context exposed to the two templates
#[derive(Serialize)]
struct TemplateContext<'a> {
    #[serde(rename = "Id")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Location")]
    location: &'a str,
    #[serde(rename = "ResourceGroup")]
    resource_group: &'a str,
    #[serde(rename = "SubscriptionId")]
    subscription_id: &'a str,
    #[serde(rename = "ClientId")]
    client_id: &'a str,
    #[serde(rename = "TenantId")]
    tenant_id: &'a str,
    #[serde(rename = "PrincipalID")]
    principal_id: &'a str,
    #[serde(rename = "Tags")]
    tags: &'a BTreeMap<String, String>,
    #[serde(rename = "Type")]
    identity_type: &'a str,
}

/// Precompiled resource-name and namespace templates
///
/// Undefined template values render as empty strings, so an identity without
/// the looked-up tag simply produces no targets instead of an error.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    /// Compile both templates; a syntax error here is startup-fatal
    pub fn new(resource_name_template: &str, namespace_template: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        env.add_template_owned(
            RESOURCE_NAME_TEMPLATE.to_string(),
            resource_name_template.to_string(),
        )
        .context("invalid resource name template")?;

        env.add_template_owned(
            NAMESPACE_TEMPLATE.to_string(),
            namespace_template.to_string(),
        )
        .context("invalid namespace template")?;

        Ok(Self { env })
    }

    /// Build the projection for one identity
    ///
    /// Fails on an unparseable resource ID or a render error; the caller
    /// logs and skips the identity.
    pub fn project(&self, msi: &ManagedIdentity, ignore_namespaces: &[String]) -> Result<MsiProjection> {
        let parsed: ResourceId = msi
            .id
            .parse()
            .with_context(|| format!("failed to parse resource ID {:?}", msi.id))?;

        let context = Value::from_serialize(&TemplateContext {
            id: &msi.id,
            name: &msi.name,
            location: &msi.location,
            resource_group: &parsed.resource_group,
            subscription_id: &parsed.subscription_id,
            client_id: &msi.properties.client_id,
            tenant_id: &msi.properties.tenant_id,
            principal_id: &msi.properties.principal_id,
            tags: &msi.tags,
            identity_type: &msi.identity_type,
        });

        let rendered_name = self.render(RESOURCE_NAME_TEMPLATE, &context)?;
        let k8s_resource_name = (!rendered_name.is_empty()).then_some(rendered_name);

        let rendered_namespaces = self.render(NAMESPACE_TEMPLATE, &context)?;
        let k8s_namespaces = split_namespaces(&rendered_namespaces, ignore_namespaces);

        Ok(MsiProjection {
            resource_id: msi.id.to_lowercase(),
            subscription_id: parsed.subscription_id.to_lowercase(),
            resource_group: parsed.resource_group.to_lowercase(),
            resource_name: parsed.resource_name.to_lowercase(),
            client_id: msi.properties.client_id.clone(),
            tenant_id: msi.properties.tenant_id.clone(),
            principal_id: msi.properties.principal_id.clone(),
            tags: msi.tags.clone(),
            k8s_resource_name,
            k8s_namespaces,
            raw: msi.clone(),
        })
    }

    fn render(&self, template: &str, context: &Value) -> Result<String> {
        self.env
            .get_template(template)
            .and_then(|tmpl| tmpl.render(context))
            .with_context(|| format!("failed to render {template} template"))
    }
}

/// Split a rendered namespace list on `,`, trim, lowercase and drop ignored
/// entries; order and duplicates are preserved as rendered
fn split_namespaces(rendered: &str, ignore_namespaces: &[String]) -> Vec<String> {
    if rendered.is_empty() {
        return Vec::new();
    }

    rendered
        .split(',')
        .map(|namespace| namespace.trim().to_lowercase())
        .filter(|namespace| !ignore_namespaces.iter().any(|ignored| ignored == namespace))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ManagedIdentityProperties;

    fn identity(tags: &[(&str, &str)]) -> ManagedIdentity {
        ManagedIdentity {
            id: "/subscriptions/SUB-ID/resourceGroups/My-RG/providers/Microsoft.ManagedIdentity/userAssignedIdentities/FOO".to_string(),
            name: "FOO".to_string(),
            location: "westeurope".to_string(),
            identity_type: "Microsoft.ManagedIdentity/userAssignedIdentities".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            properties: ManagedIdentityProperties {
                tenant_id: "tenant-id".to_string(),
                principal_id: "principal-id".to_string(),
                client_id: "client-id".to_string(),
            },
        }
    }

    fn renderer(name_template: &str, namespace_template: &str) -> TemplateRenderer {
        TemplateRenderer::new(name_template, namespace_template).expect("templates should compile")
    }

    #[test]
    fn test_invalid_template_is_rejected_at_compile_time() {
        assert!(TemplateRenderer::new("{{ Name", "{{ Tags.k8snamespace }}").is_err());
    }

    #[test]
    fn test_azure_fields_are_lowercased() {
        let renderer = renderer("{{ Name }}-{{ ClientId }}", "{{ Tags.k8snamespace }}");
        let projection = renderer.project(&identity(&[]), &[]).unwrap();

        assert_eq!(
            projection.resource_id,
            "/subscriptions/sub-id/resourcegroups/my-rg/providers/microsoft.managedidentity/userassignedidentities/foo"
        );
        assert_eq!(projection.subscription_id, "sub-id");
        assert_eq!(projection.resource_group, "my-rg");
        assert_eq!(projection.resource_name, "foo");
        // client id is not derived from the resource ID and keeps its casing
        assert_eq!(projection.client_id, "client-id");
    }

    #[test]
    fn test_resource_name_rendering() {
        let renderer = renderer("{{ Name }}-{{ ClientId }}", "{{ Tags.k8snamespace }}");
        let projection = renderer.project(&identity(&[]), &[]).unwrap();
        assert_eq!(projection.k8s_resource_name.as_deref(), Some("FOO-client-id"));
    }

    #[test]
    fn test_empty_resource_name_is_absent() {
        let renderer = renderer("{{ Tags.nosuchtag }}", "{{ Tags.k8snamespace }}");
        let projection = renderer.project(&identity(&[]), &[]).unwrap();
        assert!(projection.k8s_resource_name.is_none());
    }

    #[test]
    fn test_missing_namespace_tag_renders_no_namespaces() {
        let renderer = renderer("{{ Name }}", "{{ Tags.k8snamespace }}");
        let projection = renderer.project(&identity(&[]), &[]).unwrap();
        assert!(projection.k8s_namespaces.is_empty());
    }

    #[test]
    fn test_namespace_fan_out_preserves_order_and_duplicates() {
        let renderer = renderer("{{ Name }}", "{{ Tags.k8snamespace }}");
        let projection = renderer
            .project(&identity(&[("k8snamespace", "A, B ,A")]), &[])
            .unwrap();
        assert_eq!(projection.k8s_namespaces, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_ignored_namespaces_are_filtered() {
        let renderer = renderer("{{ Name }}", "{{ Tags.k8snamespace }}");
        let projection = renderer
            .project(
                &identity(&[("k8snamespace", "kube-system,app")]),
                &["kube-system".to_string()],
            )
            .unwrap();
        assert_eq!(projection.k8s_namespaces, vec!["app"]);
    }

    #[test]
    fn test_tag_keys_keep_their_casing() {
        let renderer = renderer("{{ Name }}", "{{ Tags.K8sNamespace }}");
        let projection = renderer
            .project(&identity(&[("K8sNamespace", "app")]), &[])
            .unwrap();
        assert_eq!(projection.k8s_namespaces, vec!["app"]);
        assert!(projection.tags.contains_key("K8sNamespace"));
    }

    #[test]
    fn test_unparseable_resource_id_is_an_error() {
        let renderer = renderer("{{ Name }}", "{{ Tags.k8snamespace }}");
        let mut msi = identity(&[]);
        msi.id = "not-a-resource-id".to_string();
        assert!(renderer.project(&msi, &[]).is_err());
    }
}
