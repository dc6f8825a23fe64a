//! Outbound HTTP client for the remote image index (spec.md §4.3).
//!
//! A short-lived `reqwest::Client` with a bounded timeout, built once and
//! reused across calls.

use std::collections::HashMap;
use std::time::Duration;

use dt_common::CoreError;
use serde::Deserialize;

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RemoteImageInfo {
    pub labels: HashMap<String, String>,
}

pub struct ImageIndexClient {
    http: reqwest::Client,
    base_url: String,
    registry: String,
}

impl ImageIndexClient {
    pub fn new(base_url: String, registry: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, base_url, registry }
    }

    /// `GET <base_url>/<registry>/<repository>/<tag>/latest.json`.
    pub async fn fetch(&self, repository: &str, tag: &str) -> Result<RemoteImageInfo, CoreError> {
        let url = format!(
            "{}/{}/{}/{}/latest.json",
            self.base_url, self.registry, repository, tag
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::RemoteUnavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(format!("{repository}:{tag}")));
        }
        if !resp.status().is_success() {
            return Err(CoreError::RemoteUnavailable(format!(
                "unexpected status {}",
                resp.status()
            )));
        }

        let body: IndexResponse = resp
            .json()
            .await
            .map_err(|e| CoreError::ParseError(e.to_string()))?;

        Ok(RemoteImageInfo { labels: body.labels })
    }
}
