use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing: env-filtered, falling back to `info` or `debug`.
///
/// `debug` corresponds to the `DEBUG` env var (spec.md §6): when set it
/// is used as the default filter level unless `RUST_LOG` overrides it.
pub fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
