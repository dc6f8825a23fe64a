//! Request handlers for the §6b contract table.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use dt_common::{CoreError, Status};
use serde_json::Map;

use crate::http::dto::{
    ContainerStatusDto, ForceQuery, JobResponse, ModuleStatusDto, ModulesInfoResponse, RunQuery,
    UpdatingResponse, VersionResponse,
};
use crate::http::envelope::{from_core_error, Envelope};
use crate::http::AppState;
use crate::module::Module;
use crate::run_container::RunRequest;

pub async fn version(State(state): State<AppState>) -> Envelope<VersionResponse> {
    Envelope::ok(VersionResponse { version: state.version.clone() })
}

pub async fn modules_info(State(state): State<AppState>) -> Envelope<ModulesInfoResponse> {
    let modules = state.registry.group_snapshot::<Arc<Module>>("modules");
    let mut out = ModulesInfoResponse::new();
    for (name, module) in modules {
        out.insert(name, module.labels().await);
    }
    Envelope::ok(out)
}

pub async fn modules_status(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
) -> Envelope<Vec<ModuleStatusDto>> {
    if query.is_forced() {
        if let Err(e) = state.checker.force_step().await {
            tracing::warn!(error = %e, "forced checker step failed");
        }
    }

    let modules = state.registry.group_snapshot::<Arc<Module>>("modules");
    let mut out = Vec::with_capacity(modules.len());
    for (name, module) in modules {
        let snap = module.snapshot().await;
        out.push(ModuleStatusDto {
            name,
            status: snap.status.to_string(),
            local_head_version: snap.local_head_version,
            local_closest_version: snap.local_closest_version,
            remote_head_version: snap.remote_head_version,
            remote_closest_version: snap.remote_closest_version,
            step: snap.step,
            progress: snap.progress,
        });
    }
    Envelope::ok(out)
}

pub async fn update_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ForceQuery>,
) -> axum::response::Response {
    let module: Arc<Module> = match state.registry.get("modules", &name) {
        Ok(m) => m,
        Err(e) => return from_core_error(e).into_response(),
    };

    if module.status().await == Status::Ahead && !query.is_forced() {
        return Envelope::<()>::need_force(format!("module {name} is AHEAD, retry with force=1"))
            .into_response();
    }

    match Arc::clone(&state.updater).start(&name).await {
        Ok(()) => Envelope::ok(JobResponse { job: name }).into_response(),
        Err(e) => from_core_error(e).into_response(),
    }
}

pub async fn update_all_modules(
    State(state): State<AppState>,
    Query(query): Query<ForceQuery>,
) -> Envelope<UpdatingResponse> {
    let modules = state.registry.group_snapshot::<Arc<Module>>("modules");
    let mut updating = Vec::new();
    for (name, module) in modules {
        let status = module.status().await;
        if status == Status::Updating {
            continue;
        }
        if status == Status::Ahead && !query.is_forced() {
            continue;
        }
        if Arc::clone(&state.updater).start(&name).await.is_ok() {
            updating.push(name);
        }
    }
    Envelope::ok(UpdatingResponse { updating })
}

pub async fn container_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.docker.inspect_container_state(&name).await {
        Ok(s) => {
            Envelope::ok(ContainerStatusDto { state: format!("{s:?}").to_uppercase() }).into_response()
        }
        Err(e) => from_core_error(e).into_response(),
    }
}

pub async fn run_container(
    State(state): State<AppState>,
    Path(module_name): Path<String>,
    Query(query): Query<RunQuery>,
    body: Bytes,
) -> axum::response::Response {
    let overlay = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Map<String, serde_json::Value>>(&body) {
            Ok(v) => Some(v),
            Err(e) => return from_core_error(CoreError::ParseError(e.to_string())).into_response(),
        }
    };

    if let Err(e) = state.registry.get::<Arc<Module>>("modules", &module_name) {
        return from_core_error(e).into_response();
    }

    let mut request = RunRequest::new(module_name.clone());
    if let Some(configuration) = query.configuration {
        request.configuration = configuration;
    }
    if let Some(launcher) = query.launcher {
        request.launcher = launcher;
    }
    request.container_name = query.name;
    request.overlay = overlay;

    // The run itself (create/start plus poll_until_terminal) can run for as
    // long as the container stays alive; spawn it and return the job
    // envelope immediately rather than blocking the response on it.
    let runner = Arc::clone(&state.runner);
    let job_name = module_name.clone();
    tokio::spawn(async move {
        if let Err(e) = runner.run(request).await {
            tracing::warn!(module = %job_name, error = %e, "run_container job failed");
        }
    });

    Envelope::ok(JobResponse { job: module_name }).into_response()
}

pub async fn container_start(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    passthrough(state.docker.start_container(&name).await)
}

pub async fn container_restart(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    passthrough(state.docker.restart_container(&name).await)
}

pub async fn container_stop(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    passthrough(state.docker.stop_container(&name).await)
}

pub async fn container_kill(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    passthrough(state.docker.kill_container(&name).await)
}

pub async fn container_pause(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    passthrough(state.docker.pause_container(&name).await)
}

pub async fn container_unpause(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    passthrough(state.docker.unpause_container(&name).await)
}

fn passthrough(result: Result<(), CoreError>) -> axum::response::Response {
    match result {
        Ok(()) => Envelope::ok(()).into_response(),
        Err(e) => from_core_error(e).into_response(),
    }
}
