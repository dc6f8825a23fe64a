//! Label keys under the `org.duckietown.label` domain.
//!
//! All image/container labels this system reads or writes live under a
//! single domain prefix; `dt_label` builds the full key from a short name.

/// Domain prefix shared by every label this system understands.
pub const DOMAIN: &str = "org.duckietown.label";

/// Gates whether an image is tracked at all.
pub const IMAGE_AUTHORITATIVE: &str = "image.authoritative";
/// ISO-8601-ish build time, compared across local/remote.
pub const TIME: &str = "time";
pub const CODE_VERSION_HEAD: &str = "code.version.head";
pub const CODE_VERSION_CLOSEST: &str = "code.version.closest";
/// Prefix; the full key is `image.configuration.<name>`.
pub const IMAGE_CONFIGURATION_PREFIX: &str = "image.configuration.";
/// On a container: which `image.configuration.<name>` it was launched with.
pub const CONTAINER_CONFIGURATION: &str = "container.configuration";
/// Written by the updater/runner onto every container it creates.
pub const CONTAINER_OWNER: &str = "container.owner";

/// Prefix of labels preserved verbatim across a recreate (module-owned labels).
pub const CONTAINER_DOMAIN_PREFIX: &str = "container.";
/// Namespace of the external compose tool, also preserved across a recreate.
pub const COMPOSE_TOOL_PREFIX: &str = "com.docker.compose.";

/// Build a fully-qualified label key, e.g. `dt_label("time") ==
/// "org.duckietown.label.time"`.
pub fn dt_label(key: &str) -> String {
    format!("{DOMAIN}.{}", key.trim_start_matches('.'))
}

/// Build the label key for a named run configuration.
pub fn image_configuration_label(name: &str) -> String {
    dt_label(&format!("{IMAGE_CONFIGURATION_PREFIX}{name}"))
}

/// The `dt-launcher-<name>` command prefix used as a container's entry command.
pub const LAUNCHER_PREFIX: &str = "dt-launcher-";

pub fn launcher_command(name: &str) -> String {
    format!("{LAUNCHER_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fully_qualified_keys() {
        assert_eq!(dt_label("time"), "org.duckietown.label.time");
        assert_eq!(dt_label(".time"), "org.duckietown.label.time");
        assert_eq!(
            image_configuration_label("default"),
            "org.duckietown.label.image.configuration.default"
        );
    }

    #[test]
    fn builds_launcher_command() {
        assert_eq!(launcher_command("default"), "dt-launcher-default");
    }
}
