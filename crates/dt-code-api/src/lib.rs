pub mod compose;
pub mod config;
pub mod docker_rt;
pub mod http;
pub mod image_index_client;
pub mod jobs;
pub mod module;
pub mod module_updater;
pub mod registry;
pub mod run_container;
pub mod update_checker;
