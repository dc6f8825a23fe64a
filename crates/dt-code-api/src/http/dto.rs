//! Response payload shapes for the HTTP surface (spec.md §6b).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatusDto {
    pub name: String,
    pub status: String,
    pub local_head_version: String,
    pub local_closest_version: String,
    pub remote_head_version: String,
    pub remote_closest_version: String,
    pub step: Option<String>,
    pub progress: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatingResponse {
    pub updating: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub job: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerStatusDto {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: Option<String>,
}

impl ForceQuery {
    /// Accepts `1`, `true`, `yes` (case-insensitive) as truthy, matching
    /// the `RELEASES_ONLY`-style bool-ish parsing in spec.md §6.
    pub fn is_forced(&self) -> bool {
        matches!(
            self.force.as_deref().map(str::to_lowercase).as_deref(),
            Some("1") | Some("true") | Some("yes")
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    pub configuration: Option<String>,
    #[serde(default)]
    pub launcher: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

pub type ModulesInfoResponse = HashMap<String, HashMap<String, String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_query_accepts_known_truthy_spellings() {
        for v in ["1", "true", "TRUE", "yes", "Yes"] {
            assert!(ForceQuery { force: Some(v.to_string()) }.is_forced(), "{v}");
        }
        assert!(!ForceQuery { force: Some("0".to_string()) }.is_forced());
        assert!(!ForceQuery { force: None }.is_forced());
    }
}
