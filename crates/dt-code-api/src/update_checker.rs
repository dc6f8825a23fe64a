//! Periodic reconciliation worker (spec.md §4.4).
//!
//! Grounded on `original_source/.../jobs/update_checker.py::
//! UpdateCheckerJob.step`, whose discover/classify/remove control flow
//! is carried over almost unchanged into a periodic sweep.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dt_common::{arch, labels, time, CoreError, Status};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::docker_rt::DockerRuntime;
use crate::image_index_client::ImageIndexClient;
use crate::module::{Module, ModuleIdentity};
use crate::registry::Registry;

const ORG: &str = "duckietown";
const HEARTBEAT: Duration = Duration::from_secs(2);

pub struct UpdateChecker {
    registry: Arc<Registry>,
    docker: Arc<DockerRuntime>,
    index_client: ImageIndexClient,
    distro: String,
    host_arch: &'static str,
    releases_only: bool,
    step_lock: Mutex<()>,
    alive: Arc<AtomicBool>,
}

impl UpdateChecker {
    pub fn new(
        registry: Arc<Registry>,
        docker: Arc<DockerRuntime>,
        index_client: ImageIndexClient,
        distro: String,
        releases_only: bool,
        alive: Arc<AtomicBool>,
    ) -> Result<Self, CoreError> {
        let host_arch = arch::canonicalize(std::env::consts::ARCH).ok_or_else(|| {
            CoreError::RuntimeError(format!(
                "unsupported host architecture: {}",
                std::env::consts::ARCH
            ))
        })?;
        Ok(Self {
            registry,
            docker,
            index_client,
            distro,
            host_arch,
            releases_only,
            step_lock: Mutex::new(()),
            alive,
        })
    }

    fn tag_pattern(&self) -> Regex {
        Regex::new(&format!(
            r"^{}/(?P<name>[^:/]+):{}-{}$",
            regex::escape(ORG),
            regex::escape(&self.distro),
            regex::escape(self.host_arch),
        ))
        .expect("pattern built from escaped segments is always valid")
    }

    /// Run until `alive` is cleared, ticking `step()` every `tick` and
    /// sleeping a short heartbeat in between (spec.md §5).
    pub async fn run(&self, tick: Duration) {
        let mut last = tokio::time::Instant::now() - tick;
        loop {
            if !self.alive.load(Ordering::SeqCst) {
                return;
            }
            if last.elapsed() >= tick {
                if let Err(e) = self.step().await {
                    tracing::warn!(error = %e, "update checker step failed");
                }
                last = tokio::time::Instant::now();
            }
            sleep(HEARTBEAT).await;
        }
    }

    /// Out-of-band forced pass (`?force=1` on the HTTP facade), serialized
    /// with the periodic loop through the same step lock.
    pub async fn force_step(&self) -> Result<(), CoreError> {
        self.step().await
    }

    async fn step(&self) -> Result<(), CoreError> {
        let _guard = self.step_lock.lock().await;

        if self.releases_only && !is_release_distro(&self.distro) {
            tracing::debug!(distro = %self.distro, "releases_only set, distro is not a release name, skipping pass");
            return Ok(());
        }

        let images = self.docker.list_images().await?;
        let pattern = self.tag_pattern();
        let mut compatible_tags: HashSet<String> = HashSet::new();

        for image in &images {
            if !is_authoritative(&image.labels) {
                continue;
            }
            let Some((tag, name)) = first_matching_tag(&image.repo_tags, &pattern) else {
                continue;
            };

            compatible_tags.insert(tag.clone());
            self.registry.set("tags", &name, tag.clone());

            let existing = self.registry.get::<Arc<Module>>("modules", &name).ok();
            match existing {
                Some(existing) if existing.identity.image_id == image.id => {
                    existing
                        .set_status_unless_solid_or_frozen(Status::Unknown)
                        .await;
                }
                // Either no module was registered under this name yet, or one
                // was but its image id no longer matches (the normal
                // post-update state) -- replace it with a fresh `Module`
                // built from the currently-tagged image.
                _ => {
                    let (repository, tag_part) = split_repo_tag(&tag);
                    let identity = ModuleIdentity {
                        name: name.clone(),
                        repository,
                        tag: tag_part,
                        image_id: image.id.clone(),
                    };
                    let module = Arc::new(Module::new(identity, image.labels.clone()));
                    self.registry.set("modules", &name, module);
                }
            }
        }

        self.removal_pass(&compatible_tags).await;
        self.classification_pass().await;

        Ok(())
    }

    async fn removal_pass(&self, compatible_tags: &HashSet<String>) {
        for (name, module) in self.registry.group_snapshot::<Arc<Module>>("modules") {
            let tag = self.registry.get_or::<String>("tags", &name, String::new());
            if !compatible_tags.contains(&tag) && module.status().await != Status::Updating {
                self.registry.remove("modules", &name);
                self.registry.remove("tags", &name);
            }
        }
    }

    async fn classification_pass(&self) {
        for (_, module) in self.registry.group_snapshot::<Arc<Module>>("modules") {
            if module.status().await == Status::Updating {
                continue;
            }
            self.classify_one(&module).await;
        }
    }

    async fn classify_one(&self, module: &Module) {
        let remote = match self
            .index_client
            .fetch(&module.identity.repository, &module.identity.tag)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                tracing::debug!(module = module.name(), error = %e, "remote probe failed");
                module
                    .set_status_unless_solid_or_frozen(Status::NotFound)
                    .await;
                return;
            }
        };

        let remote_head = label_or_nd(&remote.labels, labels::CODE_VERSION_HEAD);
        let remote_closest = label_or_nd(&remote.labels, labels::CODE_VERSION_CLOSEST);
        module
            .set_remote_versions(remote_head, remote_closest)
            .await;

        let local_labels = module.labels().await;
        let local_time = local_labels
            .get(&labels::dt_label(labels::TIME))
            .and_then(|raw| time::parse_time(raw));
        let remote_time = remote
            .labels
            .get(&labels::dt_label(labels::TIME))
            .and_then(|raw| time::parse_time(raw));

        let Some(remote_time) = remote_time else {
            module.set_status_unless_solid_or_frozen(Status::Error).await;
            return;
        };

        module.set_status(decide_status(local_time, remote_time)).await;
    }
}

/// The pure classification rule (spec.md §4.4 step 4, last four bullets).
fn decide_status(local_time: Option<DateTime<Utc>>, remote_time: DateTime<Utc>) -> Status {
    match local_time {
        None => Status::Ahead,
        Some(local) if local > remote_time => Status::Ahead,
        Some(local) if local == remote_time => Status::Updated,
        Some(_) => Status::Behind,
    }
}

/// `RELEASES_ONLY` gate: a distro name is a release unless it looks like a
/// development/staging branch name (contains a `-`), per DESIGN.md's
/// recorded Open Question decision.
fn is_release_distro(distro: &str) -> bool {
    !distro.contains('-')
}

fn is_authoritative(image_labels: &HashMap<String, String>) -> bool {
    image_labels
        .get(&labels::dt_label(labels::IMAGE_AUTHORITATIVE))
        .map(|v| v == "1")
        .unwrap_or(false)
}

fn first_matching_tag(repo_tags: &[String], pattern: &Regex) -> Option<(String, String)> {
    repo_tags.iter().find_map(|tag| {
        pattern
            .captures(tag)
            .and_then(|c| c.name("name"))
            .map(|m| (tag.clone(), m.as_str().to_string()))
    })
}

fn split_repo_tag(full: &str) -> (String, String) {
    match full.rsplit_once(':') {
        Some((repo, tag)) => (repo.to_string(), tag.to_string()),
        None => (full.to_string(), String::new()),
    }
}

fn label_or_nd(map: &HashMap<String, String>, key: &str) -> String {
    map.get(&labels::dt_label(key))
        .cloned()
        .unwrap_or_else(|| "ND".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> UpdateChecker {
        let registry = Arc::new(Registry::new());
        let docker = Arc::new(DockerRuntime::connect("unix:///var/run/docker.sock").unwrap());
        let index_client = ImageIndexClient::new(
            "https://duckietown-public-storage.s3.amazonaws.com/docker/image".to_string(),
            "docker.io".to_string(),
        );
        UpdateChecker::new(
            registry,
            docker,
            index_client,
            "daffy".to_string(),
            true,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap()
    }

    #[test]
    fn tag_pattern_matches_expected_shape() {
        let c = checker();
        let pattern = c.tag_pattern();
        let caps = pattern.captures("duckietown/dt-core:daffy-amd64").unwrap();
        assert_eq!(&caps["name"], "dt-core");
        assert!(pattern.captures("duckietown/dt-core:ente-amd64").is_none());
        assert!(pattern.captures("other/dt-core:daffy-amd64").is_none());
    }

    #[test]
    fn first_matching_tag_picks_first_match_only() {
        let pattern = Regex::new(r"^duckietown/(?P<name>[^:/]+):daffy-amd64$").unwrap();
        let tags = vec![
            "duckietown/dt-core:ente-amd64".to_string(),
            "duckietown/dt-core:daffy-amd64".to_string(),
        ];
        let (tag, name) = first_matching_tag(&tags, &pattern).unwrap();
        assert_eq!(tag, "duckietown/dt-core:daffy-amd64");
        assert_eq!(name, "dt-core");
    }

    #[test]
    fn first_matching_tag_none_when_no_tag_matches() {
        let pattern = Regex::new(r"^duckietown/(?P<name>[^:/]+):daffy-amd64$").unwrap();
        assert!(first_matching_tag(&["other/foo:latest".to_string()], &pattern).is_none());
    }

    #[test]
    fn split_repo_tag_splits_on_last_colon() {
        assert_eq!(
            split_repo_tag("duckietown/dt-core:daffy-amd64"),
            ("duckietown/dt-core".to_string(), "daffy-amd64".to_string())
        );
    }

    #[test]
    fn is_authoritative_requires_label_value_one() {
        let mut m = HashMap::new();
        m.insert(labels::dt_label(labels::IMAGE_AUTHORITATIVE), "1".to_string());
        assert!(is_authoritative(&m));
        m.insert(labels::dt_label(labels::IMAGE_AUTHORITATIVE), "0".to_string());
        assert!(!is_authoritative(&m));
        assert!(!is_authoritative(&HashMap::new()));
    }

    #[test]
    fn release_distro_gate_rejects_dash_suffixed_names() {
        assert!(is_release_distro("daffy"));
        assert!(!is_release_distro("daffy-staging"));
    }

    #[test]
    fn decide_status_missing_local_time_is_ahead() {
        let remote = time::parse_time("2024-05-01T10:00:00.000000").unwrap();
        assert_eq!(decide_status(None, remote), Status::Ahead);
    }

    #[test]
    fn decide_status_local_newer_is_ahead() {
        let local = time::parse_time("2024-06-01T10:00:00.000000").unwrap();
        let remote = time::parse_time("2024-05-01T10:00:00.000000").unwrap();
        assert_eq!(decide_status(Some(local), remote), Status::Ahead);
    }

    #[test]
    fn decide_status_equal_is_updated() {
        let t = time::parse_time("2024-05-01T10:00:00.000000").unwrap();
        assert_eq!(decide_status(Some(t), t), Status::Updated);
    }

    #[test]
    fn decide_status_local_older_is_behind() {
        let local = time::parse_time("2024-04-01T10:00:00.000000").unwrap();
        let remote = time::parse_time("2024-05-01T10:00:00.000000").unwrap();
        assert_eq!(decide_status(Some(local), remote), Status::Behind);
    }
}
