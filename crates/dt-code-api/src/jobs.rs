//! Named background-worker handles registered in the `jobs` group
//! (spec.md §4.1, §9).
//!
//! "Polymorphism over Job" (spec.md §9 design note): rather than a shared
//! trait hierarchy, each worker kind keeps its own type and is wrapped in
//! a tagged variant only for the sake of a uniform name -> handle lookup.
//! The checker, updater and runner were already registered as concrete
//! `Arc<T>`s elsewhere; this just gives the HTTP facade one place to find
//! them by name if it ever needs to beyond the `force` passthrough it
//! already has a direct handle for.

use std::sync::Arc;

use crate::module_updater::ModuleUpdater;
use crate::run_container::RunContainerWorker;
use crate::update_checker::UpdateChecker;

#[derive(Clone)]
pub enum Job {
    UpdateChecker(Arc<UpdateChecker>),
    ModuleUpdater(Arc<ModuleUpdater>),
    ContainerRunner(Arc<RunContainerWorker>),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::UpdateChecker(_) => "update-checker",
            Job::ModuleUpdater(_) => "module-updater",
            Job::ContainerRunner(_) => "container-runner",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker_rt::DockerRuntime;
    use crate::image_index_client::ImageIndexClient;
    use crate::registry::Registry;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn job_name_matches_variant() {
        let registry = Arc::new(Registry::new());
        let docker = Arc::new(DockerRuntime::connect("unix:///var/run/docker.sock").unwrap());
        let index_client = ImageIndexClient::new("https://example.invalid".to_string(), "docker.io".to_string());
        let checker = Arc::new(
            UpdateChecker::new(
                registry,
                docker,
                index_client,
                "daffy".to_string(),
                true,
                Arc::new(AtomicBool::new(true)),
            )
            .unwrap(),
        );
        assert_eq!(Job::UpdateChecker(checker).name(), "update-checker");
    }
}
