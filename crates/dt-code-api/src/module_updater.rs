//! The on-demand module update state machine (spec.md §4.5).
//!
//! Expressed as an async function yielding `(ok, step, progress)` over an
//! `mpsc` channel, the "generator-driven progress reporting" design note
//! (spec.md §9) realized as a multi-step async state transition while a
//! separate task drains the channel and writes results back into shared
//! state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::ContainerSummary;
use dt_common::{labels, CoreError, Status};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::compose;
use crate::docker_rt::{ContainerState, DockerRuntime, PullEvent};
use crate::module::Module;
use crate::registry::Registry;

const DEFERRED_RESET_DELAY: Duration = Duration::from_secs(10);

/// One observation yielded by the state machine.
#[derive(Debug, Clone)]
pub struct Progress {
    pub ok: bool,
    pub step: String,
    pub progress: i32,
}

impl Progress {
    fn ok(step: impl Into<String>, progress: u8) -> Self {
        Self { ok: true, step: step.into(), progress: progress as i32 }
    }

    fn fail(step: impl Into<String>) -> Self {
        Self { ok: false, step: step.into(), progress: -1 }
    }
}

fn emit(tx: &mpsc::UnboundedSender<Progress>, step: &str, progress: u8) {
    let _ = tx.send(Progress::ok(step, progress));
}

pub struct ModuleUpdater {
    registry: Arc<Registry>,
    docker: Arc<DockerRuntime>,
    /// This process's own module identifier (`DT_MODULE_TYPE`); gates the
    /// self-skip guard and is written as `container.owner` on recreate.
    module_type: Option<String>,
    registry_host: String,
    robot_type: Option<String>,
    autoboot_stacks_dir: String,
    alive: Arc<AtomicBool>,
}

impl ModuleUpdater {
    pub fn new(
        registry: Arc<Registry>,
        docker: Arc<DockerRuntime>,
        module_type: Option<String>,
        registry_host: String,
        robot_type: Option<String>,
        autoboot_stacks_dir: String,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            docker,
            module_type,
            registry_host,
            robot_type,
            autoboot_stacks_dir,
            alive,
        }
    }

    /// Spawn an updater for `name`. Fails fast (before spawning anything)
    /// if the module is already `UPDATING` -- the updater itself is
    /// responsible for this refusal per spec.md §4.5, the HTTP layer does
    /// not deduplicate.
    pub async fn start(self: Arc<Self>, name: &str) -> Result<(), CoreError> {
        let module: Arc<Module> = self.registry.get("modules", name)?;
        if module.status().await == Status::Updating {
            return Err(CoreError::ConcurrentState(format!(
                "module {name} is already updating"
            )));
        }
        module.set_status(Status::Updating).await;
        module.set_progress(0).await;

        let (tx, rx) = mpsc::unbounded_channel();

        let job_updater = Arc::clone(&self);
        let job_module = Arc::clone(&module);
        tokio::spawn(async move {
            if let Err(e) = job_updater.drive(&job_module, &tx).await {
                let _ = tx.send(Progress::fail(e.to_string()));
            }
        });

        tokio::spawn(self.drain_progress(module, rx));

        Ok(())
    }

    async fn drive(&self, module: &Module, tx: &mpsc::UnboundedSender<Progress>) -> Result<(), CoreError> {
        emit(tx, "init", 0);
        if !self.alive.load(Ordering::SeqCst) {
            return Ok(());
        }

        let repo_tag = module.repo_tag();
        let containers = self.docker.list_containers_by_ancestor(&repo_tag).await?;
        emit(tx, "enumerate dependent containers", 5);

        let (repository, tag) = (module.identity.repository.clone(), module.identity.tag.clone());
        self.pull(&repository, &tag, tx).await?;

        // Self-skip guard: never recreate the container this process runs
        // inside of (spec.md §4.5 step 4).
        if self.module_type.as_deref() == Some(module.name()) {
            emit(tx, "finished", 100);
            return Ok(());
        }

        if !self.alive.load(Ordering::SeqCst) {
            return Ok(());
        }

        let adapter = self.select_adapter(&repo_tag);
        adapter
            .apply(
                &self.docker,
                module,
                &containers,
                &repo_tag,
                self.module_type.as_deref(),
                tx,
            )
            .await?;

        emit(tx, "finished", 100);
        Ok(())
    }

    /// Pull `repository:tag`, reporting `5 + floor(80 * completed/total)`
    /// as layers complete. Zero observed layers keeps progress at 5
    /// (spec.md §8 boundary behavior).
    async fn pull(
        &self,
        repository: &str,
        tag: &str,
        tx: &mpsc::UnboundedSender<Progress>,
    ) -> Result<(), CoreError> {
        let total = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(StdMutex::new(HashSet::<String>::new()));
        let done = Arc::new(StdMutex::new(HashSet::<String>::new()));

        let tx = tx.clone();
        let total_c = Arc::clone(&total);
        let completed_c = Arc::clone(&completed);

        self.docker
            .pull_streaming(repository, tag, move |event: PullEvent| {
                if let Some(id) = &event.layer_id {
                    if seen.lock().unwrap().insert(id.clone()) {
                        total_c.fetch_add(1, Ordering::SeqCst);
                    }
                    let is_complete =
                        matches!(event.status.as_deref(), Some("Pull complete") | Some("Already exists"));
                    if is_complete && done.lock().unwrap().insert(id.clone()) {
                        completed_c.fetch_add(1, Ordering::SeqCst);
                    }
                }
                let total_now = total_c.load(Ordering::SeqCst);
                let completed_now = completed_c.load(Ordering::SeqCst);
                let pct = if total_now == 0 {
                    5
                } else {
                    5 + ((80 * completed_now) / total_now) as u8
                };
                emit(&tx, "pull", pct.min(85));
            })
            .await
    }

    fn select_adapter(&self, repo_tag: &str) -> Box<dyn StackAdapter> {
        if let Some(robot_type) = &self.robot_type {
            if let Some(adapter) =
                ComposeStackAdapter::resolve(&self.autoboot_stacks_dir, robot_type, &self.registry_host, repo_tag)
            {
                return Box::new(adapter);
            }
        }
        Box::new(LabelConfigAdapter)
    }

    /// Drain the progress channel into the Module record and apply the
    /// terminal handling (spec.md §4.5 "Terminal handling").
    async fn drain_progress(self: Arc<Self>, module: Arc<Module>, mut rx: mpsc::UnboundedReceiver<Progress>) {
        let mut last_progress: i32 = -1;
        let mut last_step = String::new();
        let mut failed = false;

        while let Some(update) = rx.recv().await {
            last_step = update.step.clone();
            last_progress = update.progress;
            module.set_step(update.step).await;
            if update.progress >= 0 {
                module.set_progress(update.progress as u8).await;
            }
            if !update.ok {
                failed = true;
                break;
            }
        }

        if !self.alive.load(Ordering::SeqCst) {
            // Shutdown mid-sequence: abandon without further mutation.
            return;
        }

        if !failed && last_progress == 100 {
            module.set_status(Status::Updated).await;
            module.clear_progress().await;
            return;
        }

        module.set_status(Status::Error).await;
        module.set_step(last_step).await;

        let module = Arc::clone(&module);
        let docker = Arc::clone(&self.docker);
        tokio::spawn(async move {
            tokio::time::sleep(DEFERRED_RESET_DELAY).await;
            let fresh_labels = match docker.inspect_image_labels(&module.identity.image_id).await {
                Ok(labels) => labels,
                Err(_) => module.labels().await,
            };
            module.reset(fresh_labels).await;
        });
    }
}

/// The rename/recreate/remove path (spec.md §4.5 steps 5-7), selected
/// whenever no matching compose stack service is found.
struct LabelConfigAdapter;

struct RenamedContainer {
    original_name: String,
    old_name: String,
    labels: HashMap<String, String>,
}

/// Replaces phases 5-7 with a single re-apply of the matching compose
/// stack service (spec.md §4.5 last paragraph).
pub struct ComposeStackAdapter {
    stack_path: std::path::PathBuf,
}

impl ComposeStackAdapter {
    /// Locate `<dir>/<robot>.yaml` and check it declares a service whose
    /// `image` (after substituting `${REGISTRY:-default}`) equals
    /// `<registry>/<repo:tag>`.
    pub fn resolve(
        autoboot_stacks_dir: &str,
        robot_type: &str,
        registry_host: &str,
        repo_tag: &str,
    ) -> Option<Self> {
        let path = std::path::Path::new(autoboot_stacks_dir).join(format!("{robot_type}.yaml"));
        let content = std::fs::read_to_string(&path).ok()?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&content).ok()?;
        let services = doc.get("services")?.as_mapping()?;
        let expected = format!("{registry_host}/{repo_tag}");
        let matches = services.iter().any(|(_, svc)| {
            svc.get("image")
                .and_then(|v| v.as_str())
                .map(|image| substitute_registry(image, registry_host) == expected)
                .unwrap_or(false)
        });
        matches.then_some(Self { stack_path: path })
    }
}

fn substitute_registry(image: &str, registry_host: &str) -> String {
    image.replace("${REGISTRY:-default}", registry_host)
}

#[async_trait]
trait StackAdapter: Send + Sync {
    async fn apply(
        &self,
        docker: &DockerRuntime,
        module: &Module,
        containers: &[ContainerSummary],
        repo_tag: &str,
        module_type: Option<&str>,
        tx: &mpsc::UnboundedSender<Progress>,
    ) -> Result<(), CoreError>;
}

#[async_trait]
impl StackAdapter for ComposeStackAdapter {
    async fn apply(
        &self,
        _docker: &DockerRuntime,
        _module: &Module,
        _containers: &[ContainerSummary],
        _repo_tag: &str,
        _module_type: Option<&str>,
        tx: &mpsc::UnboundedSender<Progress>,
    ) -> Result<(), CoreError> {
        emit(tx, "re-apply stack", 90);
        let status = Command::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&self.stack_path)
            .arg("up")
            .arg("-d")
            .status()
            .await
            .map_err(|e| CoreError::RuntimeError(format!("compose re-apply: {e}")))?;
        if !status.success() {
            return Err(CoreError::RuntimeError("compose re-apply exited non-zero".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StackAdapter for LabelConfigAdapter {
    async fn apply(
        &self,
        docker: &DockerRuntime,
        module: &Module,
        containers: &[ContainerSummary],
        repo_tag: &str,
        module_type: Option<&str>,
        tx: &mpsc::UnboundedSender<Progress>,
    ) -> Result<(), CoreError> {
        let mut renamed = Vec::new();
        let denom = containers.len().max(1);
        for (i, c) in containers.iter().enumerate() {
            let Some(name) = container_name(c) else { continue };
            match docker.inspect_container_state(&name).await? {
                ContainerState::NotFound => continue,
                ContainerState::Running => {
                    docker.stop_container(&name).await?;
                }
                _ => {}
            }
            let new_name = rename_with_old_suffix(&name);
            docker.rename_container(&name, &new_name).await?;
            renamed.push(RenamedContainer {
                original_name: name,
                old_name: new_name,
                labels: c.labels.clone().unwrap_or_default(),
            });
            emit(tx, "rename old", (85 + (5 * (i + 1) / denom) as u8).min(90));
        }

        let image_labels = module.labels().await;
        let denom = renamed.len().max(1);
        for (i, rc) in renamed.iter().enumerate() {
            let config_name = rc
                .labels
                .get(&labels::dt_label(labels::CONTAINER_CONFIGURATION))
                .cloned()
                .unwrap_or_else(|| "default".to_string());
            let raw_config = image_labels
                .get(&labels::image_configuration_label(&config_name))
                .or_else(|| image_labels.get(&labels::image_configuration_label("default")))
                .ok_or_else(|| CoreError::ConfigurationMissing(format!("image.configuration.{config_name}")))?;

            let parsed: serde_json::Map<String, Value> =
                serde_json::from_str(raw_config).map_err(|e| CoreError::ParseError(e.to_string()))?;
            let rewritten = compose::rewrite_restart_policy(parsed);
            let mut merged = compose::merge([rewritten, compose::static_module_defaults()]);
            merged.insert("image".to_string(), Value::String(repo_tag.to_string()));
            merged.insert("name".to_string(), Value::String(rc.original_name.clone()));

            let mut preserved = compose::preserved_labels(&rc.labels);
            preserved.insert(
                labels::dt_label(labels::CONTAINER_OWNER),
                module_type.unwrap_or_default().to_string(),
            );
            merged.insert(
                "labels".to_string(),
                serde_json::to_value(&preserved).map_err(|e| CoreError::ParseError(e.to_string()))?,
            );

            let run_cfg = compose::build_run_config(&merged)?;
            let bollard_cfg = crate::docker_rt::to_container_config(&run_cfg);
            docker
                .create_and_start_container(&rc.original_name, bollard_cfg)
                .await?;

            emit(tx, "recreate", (90 + (5 * (i + 1) / denom) as u8).min(95));
        }

        let denom = renamed.len().max(1);
        for (i, rc) in renamed.iter().enumerate() {
            if let Err(e) = docker.remove_container(&rc.old_name).await {
                tracing::warn!(container = %rc.old_name, error = %e, "failed to remove old container, ignoring");
            }
            emit(tx, "remove old", (95 + (5 * (i + 1) / denom) as u8).min(100));
        }

        Ok(())
    }
}

fn container_name(c: &ContainerSummary) -> Option<String> {
    c.names
        .as_ref()?
        .first()
        .map(|n| n.trim_start_matches('/').to_string())
}

/// Idempotent: a container already ending in `-old` is not suffixed again
/// (spec.md §8 round-trip property).
fn rename_with_old_suffix(name: &str) -> String {
    if name.ends_with("-old") {
        name.to_string()
    } else {
        format!("{name}-old")
    }
}
