use clap::Parser;

/// Process configuration, one field per environment variable in spec.md §6.
#[derive(Debug, Clone, Parser)]
#[command(name = "dt-code-api")]
pub struct Config {
    /// Minutes between update-checker passes. Clamped to >= 1.
    #[arg(long, env = "CHECK_UPDATES_EVERY_MIN", default_value_t = 30)]
    check_updates_every_min: u64,

    /// Whether only release-distro tags are tracked by the update checker.
    #[arg(long, env = "RELEASES_ONLY", default_value_t = true)]
    pub releases_only: bool,

    /// Registry host used both for the remote index URL and stack image substitution.
    #[arg(long, env = "DOCKER_REGISTRY", default_value = "docker.io")]
    pub docker_registry: String,

    /// This process's own module name; gates the update-self-skip guard.
    #[arg(long, env = "DT_MODULE_TYPE")]
    pub module_type: Option<String>,

    /// Distro prefix (before the first `-`) used in the tag-matching pattern.
    #[arg(long, env = "DT_DISTRO", default_value = "UNKNOWN")]
    pub distro: String,

    /// Robot type, used to locate `<dir>/<robot>.yaml` for the stack-based update path.
    #[arg(long, env = "ROBOT_TYPE")]
    pub robot_type: Option<String>,

    /// Container runtime endpoint. Defaults to the local Docker socket.
    #[arg(long, env = "TARGET_ENDPOINT", default_value = "unix:///var/run/docker.sock")]
    pub target_endpoint: String,

    /// Verbose logging.
    #[arg(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// HTTP bind port for the control-plane API.
    #[arg(long, env = "API_PORT", default_value_t = 8091)]
    pub api_port: u16,

    /// Directory holding autoboot stack files, `<dir>/<robot>.yaml`.
    #[arg(long, env = "AUTOBOOT_STACKS_DIR", default_value = "/data/autoboot")]
    pub autoboot_stacks_dir: String,
}

impl Config {
    /// Minutes between checker passes, clamped to the documented lower bound.
    pub fn check_updates_every_min(&self) -> u64 {
        self.check_updates_every_min.max(1)
    }

    pub fn remote_index_base(&self) -> String {
        "https://duckietown-public-storage.s3.amazonaws.com/docker/image".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_zero_interval_to_one_minute() {
        let cfg = Config {
            check_updates_every_min: 0,
            releases_only: true,
            docker_registry: "docker.io".into(),
            module_type: None,
            distro: "daffy".into(),
            robot_type: None,
            target_endpoint: "unix:///var/run/docker.sock".into(),
            debug: false,
            api_port: 8091,
            autoboot_stacks_dir: "/data/autoboot".into(),
        };
        assert_eq!(cfg.check_updates_every_min(), 1);
    }
}
