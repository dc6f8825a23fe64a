//! Route table for the §6b contract (all endpoints read as `GET`, matching
//! the original control-plane's query-string-driven facade).

use axum::routing::get;
use axum::Router;

use super::{handlers, AppState};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(handlers::version))
        .route("/modules/info", get(handlers::modules_info))
        .route("/modules/status", get(handlers::modules_status))
        .route("/module/update/:name", get(handlers::update_module))
        .route("/modules/update/all", get(handlers::update_all_modules))
        .route("/container/status/:name", get(handlers::container_status))
        .route("/container/run/:module", get(handlers::run_container))
        .route("/container/start/:name", get(handlers::container_start))
        .route("/container/restart/:name", get(handlers::container_restart))
        .route("/container/stop/:name", get(handlers::container_stop))
        .route("/container/kill/:name", get(handlers::container_kill))
        .route("/container/pause/:name", get(handlers::container_pause))
        .route("/container/unpause/:name", get(handlers::container_unpause))
        .with_state(state)
}
