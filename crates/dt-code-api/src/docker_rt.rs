//! Container runtime client: the thin `bollard` wrapper every worker goes
//! through for image/container primitives.
//!
//! Built over `bollard` rather than shelling out to the `docker` CLI --
//! streaming pull progress and idempotent rename need a real API client,
//! with a connect/images/lifecycle/operations split that keeps the raw
//! client out of callers' hands.

use std::collections::HashMap;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, RenameContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{
    ContainerSummary, DeviceMapping, HostConfig, ImageSummary, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use dt_common::CoreError;
use futures_util::StreamExt;

use crate::compose::RunConfig;

pub struct DockerRuntime {
    client: Docker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Unknown,
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    NotFound,
}

impl ContainerState {
    pub fn from_api(state: &str) -> Self {
        match state {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    /// States under which the run-container worker considers the job alive.
    pub fn is_good(&self) -> bool {
        matches!(
            self,
            Self::Unknown | Self::Created | Self::Running | Self::Paused | Self::Restarting
        )
    }
}

#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// One reported event from a streaming image pull.
#[derive(Debug, Clone)]
pub struct PullEvent {
    pub layer_id: Option<String>,
    pub status: Option<String>,
}

impl DockerRuntime {
    /// Connect to the runtime endpoint. `unix:///...` connects over the
    /// local socket; anything else is handled by bollard's generic
    /// connector (TCP/TLS endpoints).
    pub fn connect(endpoint: &str) -> Result<Self, CoreError> {
        let client = if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| CoreError::RuntimeError(format!("connect to {endpoint}: {e}")))?;
        Ok(Self { client })
    }

    /// List every non-intermediate image on the host. Authoritative
    /// filtering (label `image.authoritative == "1"`) is the caller's job
    /// (`update_checker::step`), not this client's.
    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, CoreError> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        self.client
            .list_images(Some(options))
            .await
            .map_err(into_runtime_error)
    }

    pub async fn list_containers_by_ancestor(
        &self,
        ancestor: &str,
    ) -> Result<Vec<ContainerSummary>, CoreError> {
        let mut filters = HashMap::new();
        filters.insert("ancestor".to_string(), vec![ancestor.to_string()]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        self.client
            .list_containers(Some(options))
            .await
            .map_err(into_runtime_error)
    }

    /// Labels baked into an image's config, used to rebuild a module's
    /// local label set after a deferred reset (spec.md §4.2, §4.5).
    pub async fn inspect_image_labels(
        &self,
        image_id: &str,
    ) -> Result<HashMap<String, String>, CoreError> {
        let details = self
            .client
            .inspect_image(image_id)
            .await
            .map_err(into_runtime_error)?;
        Ok(details.config.and_then(|c| c.labels).unwrap_or_default())
    }

    pub async fn inspect_container_state(&self, name: &str) -> Result<ContainerState, CoreError> {
        match self.client.inspect_container(name, None).await {
            Ok(details) => {
                let state = details
                    .state
                    .and_then(|s| s.status)
                    .map(|s| format!("{s:?}").to_lowercase());
                Ok(state
                    .map(|s| ContainerState::from_api(&s))
                    .unwrap_or(ContainerState::Unknown))
            }
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(ContainerState::NotFound)
            }
            Err(e) => Err(into_runtime_error(e)),
        }
    }

    pub async fn stop_container(&self, name: &str) -> Result<(), CoreError> {
        match self
            .client
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(into_runtime_error(e)),
        }
    }

    pub async fn start_container(&self, name: &str) -> Result<(), CoreError> {
        self.client
            .start_container::<String>(name, None)
            .await
            .map_err(into_runtime_error)
    }

    pub async fn unpause_container(&self, name: &str) -> Result<(), CoreError> {
        self.client.unpause_container(name).await.map_err(into_runtime_error)
    }

    pub async fn pause_container(&self, name: &str) -> Result<(), CoreError> {
        self.client.pause_container(name).await.map_err(into_runtime_error)
    }

    pub async fn restart_container(&self, name: &str) -> Result<(), CoreError> {
        self.client
            .restart_container(name, None)
            .await
            .map_err(into_runtime_error)
    }

    pub async fn kill_container(&self, name: &str) -> Result<(), CoreError> {
        self.client.kill_container::<String>(name, None).await.map_err(into_runtime_error)
    }

    /// Rename is idempotent: renaming a container already ending in the
    /// suffix is a no-op (spec.md §8).
    pub async fn rename_container(&self, name: &str, new_name: &str) -> Result<(), CoreError> {
        if name == new_name {
            return Ok(());
        }
        self.client
            .rename_container(name, RenameContainerOptions { name: new_name })
            .await
            .map_err(into_runtime_error)
    }

    pub async fn remove_container(&self, name: &str) -> Result<(), CoreError> {
        match self
            .client
            .remove_container(name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
        {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(into_runtime_error(e)),
        }
    }

    pub async fn create_and_start_container(
        &self,
        name: &str,
        config: ContainerConfig<String>,
    ) -> Result<(), CoreError> {
        self.client
            .create_container(Some(CreateContainerOptions { name, platform: None }), config)
            .await
            .map_err(into_runtime_error)?;
        self.start_container(name).await
    }

    /// Pull `repository:tag`, invoking `on_event` for every streamed layer
    /// status line. The caller derives progress from `completed` layers
    /// (`Pull complete` / `Already exists`) over the running total.
    pub async fn pull_streaming<F>(
        &self,
        repository: &str,
        tag: &str,
        mut on_event: F,
    ) -> Result<(), CoreError>
    where
        F: FnMut(PullEvent),
    {
        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            let info = item.map_err(into_runtime_error)?;
            on_event(PullEvent {
                layer_id: info.id,
                status: info.status,
            });
        }
        Ok(())
    }
}

fn into_runtime_error(e: BollardError) -> CoreError {
    CoreError::RuntimeError(e.to_string())
}

/// Translate a parsed [`RunConfig`] into the shape `bollard` expects for
/// container creation (spec.md §4.5 step 6, §4.7).
pub fn to_container_config(run: &RunConfig) -> ContainerConfig<String> {
    let restart_policy = run.restart_policy_name.as_deref().map(|name| RestartPolicy {
        name: Some(restart_policy_name_enum(name)),
        maximum_retry_count: None,
    });

    let port_bindings = if run.port_bindings.is_empty() {
        None
    } else {
        Some(
            run.port_bindings
                .iter()
                .map(|(container_port, host_port)| {
                    (
                        container_port.clone(),
                        Some(vec![PortBinding {
                            host_ip: None,
                            host_port: Some(host_port.to_string()),
                        }]),
                    )
                })
                .collect(),
        )
    };

    let devices = if run.devices.is_empty() {
        None
    } else {
        Some(run.devices.iter().filter_map(|d| parse_device(d)).collect())
    };

    let host_config = HostConfig {
        restart_policy,
        binds: if run.binds.is_empty() { None } else { Some(run.binds.clone()) },
        port_bindings,
        devices,
        privileged: Some(run.privileged),
        network_mode: run.network_mode.clone(),
        ..Default::default()
    };

    ContainerConfig {
        image: Some(run.image.clone()),
        cmd: run.command.clone(),
        env: if run.env.is_empty() { None } else { Some(run.env.clone()) },
        labels: if run.labels.is_empty() { None } else { Some(run.labels.clone()) },
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn parse_device(spec: &str) -> Option<DeviceMapping> {
    let mut parts = spec.splitn(3, ':');
    let path_on_host = parts.next()?.to_string();
    let path_in_container = parts.next().unwrap_or(&path_on_host).to_string();
    let cgroup_permissions = parts.next().unwrap_or("rwm").to_string();
    Some(DeviceMapping {
        path_on_host: Some(path_on_host),
        path_in_container: Some(path_in_container),
        cgroup_permissions: Some(cgroup_permissions),
    })
}

fn restart_policy_name_enum(name: &str) -> RestartPolicyNameEnum {
    match name {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "no" => RestartPolicyNameEnum::NO,
        _ => RestartPolicyNameEnum::EMPTY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose;
    use serde_json::{json, Map};

    #[test]
    fn translates_restart_policy_and_image() {
        let merged = Map::from_iter([
            ("image".to_string(), json!("org/foo:tag")),
            ("name".to_string(), json!("foo-1")),
            ("restart_policy".to_string(), json!({"Name": "always"})),
        ]);
        let run = compose::build_run_config(&merged).unwrap();
        let cfg = to_container_config(&run);
        assert_eq!(cfg.image.as_deref(), Some("org/foo:tag"));
        let host_config = cfg.host_config.unwrap();
        assert_eq!(
            host_config.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::ALWAYS)
        );
    }

    #[test]
    fn parses_device_mapping_with_permissions() {
        let mapping = parse_device("/dev/video0:/dev/video0:rwm").unwrap();
        assert_eq!(mapping.path_on_host.as_deref(), Some("/dev/video0"));
        assert_eq!(mapping.cgroup_permissions.as_deref(), Some("rwm"));
    }

    #[test]
    fn device_mapping_defaults_container_path_to_host_path() {
        let mapping = parse_device("/dev/ttyUSB0").unwrap();
        assert_eq!(mapping.path_in_container.as_deref(), Some("/dev/ttyUSB0"));
    }
}
