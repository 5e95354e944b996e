//! # ARM Resource IDs
//!
//! Parsing and assembly of Azure Resource Manager resource IDs of the form
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceIdError {
    #[error("malformed Azure resource ID {0:?}")]
    Malformed(String),
}

/// A parsed ARM resource ID
///
/// Segment values keep their original casing; callers decide where to
/// lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider_namespace: String,
    pub resource_type: String,
    pub resource_name: String,
}

impl FromStr for ResourceId {
    type Err = ResourceIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || ResourceIdError::Malformed(value.to_string());

        let mut segments = value.strip_prefix('/').ok_or_else(malformed)?.split('/');

        fn expect_keyword<'a>(
            segments: &mut impl Iterator<Item = &'a str>,
            keyword: &str,
            malformed: impl Fn() -> ResourceIdError,
        ) -> Result<(), ResourceIdError> {
            match segments.next() {
                Some(segment) if segment.eq_ignore_ascii_case(keyword) => Ok(()),
                _ => Err(malformed()),
            }
        }

        expect_keyword(&mut segments, "subscriptions", malformed)?;
        let subscription_id = segments.next().ok_or_else(malformed)?;
        expect_keyword(&mut segments, "resourceGroups", malformed)?;
        let resource_group = segments.next().ok_or_else(malformed)?;
        expect_keyword(&mut segments, "providers", malformed)?;
        let provider_namespace = segments.next().ok_or_else(malformed)?;
        let resource_type = segments.next().ok_or_else(malformed)?;
        let resource_name = segments.next().ok_or_else(malformed)?;

        if segments.next().is_some()
            || subscription_id.is_empty()
            || resource_group.is_empty()
            || resource_name.is_empty()
        {
            return Err(malformed());
        }

        Ok(ResourceId {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            provider_namespace: provider_namespace.to_string(),
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
        })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}",
            self.subscription_id,
            self.resource_group,
            self.provider_namespace,
            self.resource_type,
            self.resource_name
        )
    }
}
