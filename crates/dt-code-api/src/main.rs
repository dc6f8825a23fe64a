use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use dt_code_api::config::Config;
use dt_code_api::docker_rt::DockerRuntime;
use dt_code_api::http::{self, AppState};
use dt_code_api::image_index_client::ImageIndexClient;
use dt_code_api::jobs::Job;
use dt_code_api::module_updater::ModuleUpdater;
use dt_code_api::registry::Registry;
use dt_code_api::run_container::RunContainerWorker;
use dt_code_api::update_checker::UpdateChecker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    dt_common::telemetry::init_tracing(config.debug);
    tracing::info!(module_type = ?config.module_type, distro = %config.distro, "dt-code-api starting...");

    let registry = Arc::new(Registry::new());
    let docker = Arc::new(DockerRuntime::connect(&config.target_endpoint)?);
    let alive = Arc::new(AtomicBool::new(true));

    let index_client =
        ImageIndexClient::new(config.remote_index_base(), config.docker_registry.clone());
    let checker = Arc::new(UpdateChecker::new(
        Arc::clone(&registry),
        Arc::clone(&docker),
        index_client,
        config.distro.clone(),
        config.releases_only,
        Arc::clone(&alive),
    )?);
    registry.set("jobs", "update-checker", Job::UpdateChecker(Arc::clone(&checker)));

    let updater = Arc::new(ModuleUpdater::new(
        Arc::clone(&registry),
        Arc::clone(&docker),
        config.module_type.clone(),
        config.docker_registry.clone(),
        config.robot_type.clone(),
        config.autoboot_stacks_dir.clone(),
        Arc::clone(&alive),
    ));
    registry.set("jobs", "module-updater", Job::ModuleUpdater(Arc::clone(&updater)));

    let runner = Arc::new(RunContainerWorker::new(
        Arc::clone(&registry),
        Arc::clone(&docker),
        config.module_type.clone(),
        Arc::clone(&alive),
    ));
    registry.set("jobs", "container-runner", Job::ContainerRunner(Arc::clone(&runner)));

    {
        let checker = Arc::clone(&checker);
        let tick = Duration::from_secs(config.check_updates_every_min() * 60);
        tokio::spawn(async move { checker.run(tick).await });
    }

    let state = AppState {
        registry: Arc::clone(&registry),
        docker: Arc::clone(&docker),
        checker: Arc::clone(&checker),
        updater: Arc::clone(&updater),
        runner: Arc::clone(&runner),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let app = http::build_router(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "dt-code-api HTTP facade listening");

    let shutdown_alive = Arc::clone(&alive);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_alive.store(false, Ordering::SeqCst);
    });

    axum::serve(listener, app).await?;
    Ok(())
}
