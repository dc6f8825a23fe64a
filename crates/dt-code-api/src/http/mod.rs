//! The HTTP facade (spec.md §6b): envelope + DTOs + handlers + routing.

pub mod dto;
pub mod envelope;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use crate::docker_rt::DockerRuntime;
use crate::module_updater::ModuleUpdater;
use crate::registry::Registry;
use crate::run_container::RunContainerWorker;
use crate::update_checker::UpdateChecker;

/// Shared state handed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub docker: Arc<DockerRuntime>,
    pub checker: Arc<UpdateChecker>,
    pub updater: Arc<ModuleUpdater>,
    pub runner: Arc<RunContainerWorker>,
    pub version: String,
}

pub use routes::build_router;
