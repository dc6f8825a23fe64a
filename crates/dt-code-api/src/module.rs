//! The per-module value object held in the Registry (spec.md §3, §4.2).
//!
//! All mutation goes through setters that take the record's internal
//! lock -- a property/setter layout wrapped in an interior-locked Rust
//! struct shared behind `Arc<...>` handles.

use std::collections::HashMap;

use dt_common::Status;
use tokio::sync::RwLock;

const ND: &str = "ND";

#[derive(Debug, Clone)]
pub struct ModuleInner {
    pub local_head_version: String,
    pub local_closest_version: String,
    pub remote_head_version: String,
    pub remote_closest_version: String,
    pub status: Status,
    pub step: Option<String>,
    pub progress: Option<u8>,
    pub labels: HashMap<String, String>,
}

/// Identity: immutable for the module's lifetime (constructor only).
#[derive(Debug, Clone)]
pub struct ModuleIdentity {
    pub name: String,
    pub repository: String,
    pub tag: String,
    /// The underlying image id this module currently tracks; used by the
    /// checker to decide whether a same-named image is a true replacement.
    pub image_id: String,
}

pub struct Module {
    pub identity: ModuleIdentity,
    inner: RwLock<ModuleInner>,
}

impl Module {
    pub fn new(identity: ModuleIdentity, labels: HashMap<String, String>) -> Self {
        let inner = ModuleInner {
            local_head_version: label_or_nd(&labels, dt_common::labels::CODE_VERSION_HEAD),
            local_closest_version: label_or_nd(&labels, dt_common::labels::CODE_VERSION_CLOSEST),
            remote_head_version: ND.to_string(),
            remote_closest_version: ND.to_string(),
            status: Status::Unknown,
            step: None,
            progress: None,
            labels,
        };
        Self {
            identity,
            inner: RwLock::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn repo_tag(&self) -> String {
        format!("{}:{}", self.identity.repository, self.identity.tag)
    }

    pub async fn status(&self) -> Status {
        self.inner.read().await.status
    }

    pub async fn set_status(&self, status: Status) {
        self.inner.write().await.status = status;
    }

    /// Set status only if the current status is not solid or frozen --
    /// the "preserve solid/frozen across transient failure" rule used
    /// throughout the checker (spec.md §4.4, §7).
    pub async fn set_status_unless_solid_or_frozen(&self, status: Status) {
        let mut inner = self.inner.write().await;
        if !inner.status.is_solid_or_frozen() {
            inner.status = status;
        }
    }

    pub async fn set_step(&self, step: impl Into<String>) {
        self.inner.write().await.step = Some(step.into());
    }

    pub async fn set_progress(&self, progress: u8) {
        self.inner.write().await.progress = Some(progress.min(100));
    }

    pub async fn set_remote_versions(&self, head: String, closest: String) {
        let mut inner = self.inner.write().await;
        inner.remote_head_version = head;
        inner.remote_closest_version = closest;
    }

    /// Clear `progress` once an update job has finished successfully
    /// (spec.md §4.5 terminal handling: "set `status = UPDATED`, clear
    /// `progress`").
    pub async fn clear_progress(&self) {
        self.inner.write().await.progress = None;
    }

    pub async fn snapshot(&self) -> ModuleInner {
        self.inner.read().await.clone()
    }

    pub async fn labels(&self) -> HashMap<String, String> {
        self.inner.read().await.labels.clone()
    }

    /// Restore local labels from the underlying image, clear remote
    /// versions, clear progress/step, and set status back to `Unknown`.
    /// Called after an `Error` terminal so the next checker pass can
    /// reclassify the module (spec.md §4.2).
    pub async fn reset(&self, fresh_labels: HashMap<String, String>) {
        let mut inner = self.inner.write().await;
        inner.local_head_version = label_or_nd(&fresh_labels, dt_common::labels::CODE_VERSION_HEAD);
        inner.local_closest_version =
            label_or_nd(&fresh_labels, dt_common::labels::CODE_VERSION_CLOSEST);
        inner.labels = fresh_labels;
        inner.remote_head_version = ND.to_string();
        inner.remote_closest_version = ND.to_string();
        inner.progress = None;
        inner.step = None;
        inner.status = Status::Unknown;
    }
}

fn label_or_nd(labels: &HashMap<String, String>, key: &str) -> String {
    labels
        .get(&dt_common::labels::dt_label(key))
        .cloned()
        .unwrap_or_else(|| ND.to_string())
}
