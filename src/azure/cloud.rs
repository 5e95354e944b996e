//! # Azure Cloud Environments
//!
//! Maps Azure cloud names to their resource-manager endpoints.

use anyhow::{bail, Result};

/// An Azure cloud environment and its management-plane endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    pub name: &'static str,
    pub resource_manager_endpoint: &'static str,
}

pub const PUBLIC_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzurePublicCloud",
    resource_manager_endpoint: "https://management.azure.com",
};

pub const CHINA_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureChinaCloud",
    resource_manager_endpoint: "https://management.chinacloudapi.cn",
};

pub const US_GOVERNMENT_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureUSGovernmentCloud",
    resource_manager_endpoint: "https://management.usgovcloudapi.net",
};

pub const GERMAN_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureGermanCloud",
    resource_manager_endpoint: "https://management.microsoftazure.de",
};

impl CloudEnvironment {
    /// Look up a cloud environment by its name
    pub fn from_name(name: &str) -> Result<CloudEnvironment> {
        match name {
            "AzurePublicCloud" => Ok(PUBLIC_CLOUD),
            "AzureChinaCloud" => Ok(CHINA_CLOUD),
            "AzureUSGovernmentCloud" => Ok(US_GOVERNMENT_CLOUD),
            "AzureGermanCloud" => Ok(GERMAN_CLOUD),
            other => bail!("unknown Azure cloud environment {other:?}"),
        }
    }

    /// OAuth2 token scope for the management plane of this cloud
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.resource_manager_endpoint)
    }
}
