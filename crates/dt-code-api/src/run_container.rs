//! One-shot container launcher (spec.md §4.6).
//!
//! Grounded on `original_source/.../jobs/run_container.py::RunContainerJob`
//! for the reuse-by-name branch, expressed here as an inspect-then-decide
//! state match over the container's current lifecycle state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dt_common::{labels, CoreError};
use serde_json::{Map, Value};

use crate::compose;
use crate::docker_rt::{self, ContainerState, DockerRuntime};
use crate::module::Module;
use crate::registry::Registry;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Request parameters, mirroring the `/container/run/<module>` query
/// string plus an optional JSON body overlay (spec.md §6b).
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub module_name: String,
    pub configuration: String,
    pub launcher: String,
    pub container_name: Option<String>,
    pub overlay: Option<Map<String, Value>>,
}

impl RunRequest {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            configuration: "default".to_string(),
            launcher: "default".to_string(),
            container_name: None,
            overlay: None,
        }
    }
}

pub struct RunContainerWorker {
    registry: Arc<Registry>,
    docker: Arc<DockerRuntime>,
    module_type: Option<String>,
    alive: Arc<AtomicBool>,
}

impl RunContainerWorker {
    pub fn new(
        registry: Arc<Registry>,
        docker: Arc<DockerRuntime>,
        module_type: Option<String>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self { registry, docker, module_type, alive }
    }

    pub async fn run(&self, request: RunRequest) -> Result<(), CoreError> {
        let module: Arc<Module> = self.registry.get("modules", &request.module_name)?;
        let name = request
            .container_name
            .clone()
            .unwrap_or_else(|| request.module_name.clone());

        match self.docker.inspect_container_state(&name).await? {
            ContainerState::NotFound => {
                self.create_and_launch(&module, &request, &name).await?;
            }
            ContainerState::Exited | ContainerState::Dead | ContainerState::Created => {
                self.docker.start_container(&name).await?;
            }
            ContainerState::Paused => {
                self.docker.unpause_container(&name).await?;
            }
            _ => {
                return Err(CoreError::ConcurrentState(format!("container {name} already exists")));
            }
        }

        self.poll_until_terminal(&name).await;
        Ok(())
    }

    async fn create_and_launch(
        &self,
        module: &Module,
        request: &RunRequest,
        name: &str,
    ) -> Result<(), CoreError> {
        let image_labels = module.labels().await;
        let raw_config = image_labels
            .get(&labels::image_configuration_label(&request.configuration))
            .ok_or_else(|| {
                CoreError::ConfigurationMissing(format!(
                    "image.configuration.{}",
                    request.configuration
                ))
            })?;
        let image_config: Map<String, Value> =
            serde_json::from_str(raw_config).map_err(|e| CoreError::ParseError(e.to_string()))?;
        let overlay = request.overlay.clone().unwrap_or_default();

        let mut owner_labels = HashMap::new();
        owner_labels.insert(
            labels::dt_label(labels::CONTAINER_OWNER),
            self.module_type.clone().unwrap_or_default(),
        );

        let rewritten = build_run_request_config(
            image_config,
            overlay,
            module.repo_tag(),
            name.to_string(),
            labels::launcher_command(&request.launcher),
            owner_labels,
        )?;

        let run_cfg = compose::build_run_config(&rewritten)?;
        let bollard_cfg = docker_rt::to_container_config(&run_cfg);
        self.docker.create_and_start_container(name, bollard_cfg).await
    }

    /// Poll until the container leaves the "alive" state set or shutdown
    /// is requested (spec.md §4.6 last paragraph).
    async fn poll_until_terminal(&self, name: &str) {
        loop {
            if !self.alive.load(Ordering::SeqCst) {
                return;
            }
            match self.docker.inspect_container_state(name).await {
                Ok(state) if !state.is_good() => return,
                Ok(_) => {}
                Err(_) => return,
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Merge order per spec.md §4.6 step 3: image configuration -> custom
/// overlay -> static defaults -> derived fields (later overrides
/// earlier), then apply the compose->SDK rewrite.
fn build_run_request_config(
    image_config: Map<String, Value>,
    overlay: Map<String, Value>,
    image: String,
    name: String,
    command: String,
    owner_labels: HashMap<String, String>,
) -> Result<Map<String, Value>, CoreError> {
    let mut derived = Map::new();
    derived.insert("image".to_string(), Value::String(image));
    derived.insert("name".to_string(), Value::String(name));
    derived.insert("command".to_string(), Value::String(command));
    derived.insert(
        "labels".to_string(),
        serde_json::to_value(&owner_labels).map_err(|e| CoreError::ParseError(e.to_string()))?,
    );

    let merged = compose::merge([image_config, overlay, compose::static_module_defaults(), derived]);
    Ok(compose::rewrite_restart_policy(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_request_defaults_to_default_configuration_and_launcher() {
        let req = RunRequest::new("foo");
        assert_eq!(req.configuration, "default");
        assert_eq!(req.launcher, "default");
        assert!(req.container_name.is_none());
    }

    #[test]
    fn overlay_overrides_image_configuration() {
        let image_config = Map::from_iter([("privileged".to_string(), json!(false))]);
        let overlay = Map::from_iter([("privileged".to_string(), json!(true))]);
        let merged = build_run_request_config(
            image_config,
            overlay,
            "org/foo:tag".to_string(),
            "foo".to_string(),
            "dt-launcher-default".to_string(),
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(merged.get("privileged"), Some(&json!(true)));
    }

    #[test]
    fn derived_fields_always_win_over_overlay() {
        let image_config = Map::new();
        let overlay = Map::from_iter([("name".to_string(), json!("attacker-chosen"))]);
        let merged = build_run_request_config(
            image_config,
            overlay,
            "org/foo:tag".to_string(),
            "foo".to_string(),
            "dt-launcher-default".to_string(),
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(merged.get("name"), Some(&json!("foo")));
        assert_eq!(merged.get("image"), Some(&json!("org/foo:tag")));
    }

    #[test]
    fn static_defaults_fill_gaps_but_overlay_can_override_them() {
        let image_config = Map::new();
        let overlay = Map::from_iter([("auto_remove".to_string(), json!(true))]);
        let merged = build_run_request_config(
            image_config,
            overlay,
            "org/foo:tag".to_string(),
            "foo".to_string(),
            "dt-launcher-default".to_string(),
            HashMap::new(),
        )
        .unwrap();
        // static_module_defaults is merged *after* overlay, so it wins here --
        // matches spec.md §4.6's literal ordering (overlay < static defaults).
        assert_eq!(merged.get("auto_remove"), Some(&json!(false)));
        assert_eq!(merged.get("detach"), Some(&json!(true)));
    }
}
