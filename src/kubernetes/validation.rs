//! # Label Validation
//!
//! Kubernetes label-value rules, applied to the Azure-derived values used in
//! label selectors before they reach the apiserver.

use anyhow::{bail, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a Kubernetes label value
pub const MAX_LABEL_VALUE_LEN: usize = 63;

static LABEL_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$")
        .expect("label value regex is hardcoded and valid")
});

/// Whether a string is a valid Kubernetes label value
///
/// Empty values are valid; non-empty values must start and end with an
/// alphanumeric character and may contain `-`, `_` and `.` in between.
pub fn is_valid_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_VALUE_LEN && LABEL_VALUE_RE.is_match(value)
}

/// Validate a label value, producing a descriptive error naming the field
pub fn validate_label_value(value: &str, field: &str) -> Result<()> {
    if !is_valid_label_value(value) {
        bail!("invalid label value {value:?} for {field}: must be at most {MAX_LABEL_VALUE_LEN} characters of [A-Za-z0-9-_.], starting and ending alphanumeric");
    }
    Ok(())
}
