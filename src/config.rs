//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::manager::DEFAULT_MOUNT_ROOT;
use crate::memory::MEMORY_DRIVER_NAME;
use crate::mount_table::DEFAULT_MOUNTS_FILE;
use crate::tracker::WaitPolicy;

/// Core settings merged from defaults, `volctl.toml`, and `VOLCTL_*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VOLCTL",
    discovery(
        app_name = "volctl",
        env_var = "VOLCTL_CONFIG_PATH",
        config_file_name = "volctl.toml",
        dotfile_name = ".volctl.toml",
        project_file_name = "volctl.toml"
    )
)]
pub struct VolctlConfig {
    /// Driver used when the caller does not select one.
    #[ortho_config(default = MEMORY_DRIVER_NAME.to_owned())]
    pub default_driver: String,
    /// Directory under which volumes are mounted.
    #[ortho_config(default = DEFAULT_MOUNT_ROOT.to_owned())]
    pub mount_root: String,
    /// Filesystem for blank volumes; the driver's preference when unset.
    pub default_fs_type: Option<String>,
    /// Deadline for synchronous waits, in seconds.
    #[ortho_config(default = 300)]
    pub wait_timeout_secs: u64,
    /// First poll interval, in milliseconds.
    #[ortho_config(default = 500)]
    pub poll_interval_ms: u64,
    /// Upper bound for the backed-off poll interval, in milliseconds.
    #[ortho_config(default = 5000)]
    pub max_poll_interval_ms: u64,
    /// How long unqueried fire-and-forget records are kept, in seconds.
    #[ortho_config(default = 600)]
    pub operation_retention_secs: u64,
    /// Kernel mount table to read.
    #[ortho_config(default = DEFAULT_MOUNTS_FILE.to_owned())]
    pub mounts_file: String,
    /// Instance identifier the memory driver reports for this host.
    #[ortho_config(default = "localhost".to_owned())]
    pub memory_instance_id: String,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    pub(crate) fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in volctl.toml",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }

    pub(crate) fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {} ({reason}): check {} or {} in [{}] of volctl.toml",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }
}

/// Fails with an actionable message when `value` is blank.
pub(crate) fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

impl VolctlConfig {
    /// Built-in values used when no source overrides them.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            default_driver: MEMORY_DRIVER_NAME.to_owned(),
            mount_root: DEFAULT_MOUNT_ROOT.to_owned(),
            default_fs_type: None,
            wait_timeout_secs: 300,
            poll_interval_ms: 500,
            max_poll_interval_ms: 5000,
            operation_retention_secs: 600,
            mounts_file: DEFAULT_MOUNTS_FILE.to_owned(),
            memory_instance_id: String::from("localhost"),
        }
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("volctl")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply each value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank values and
    /// [`ConfigError::Invalid`] for out-of-range ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.default_driver,
            &FieldMetadata::new(
                "default storage driver",
                "VOLCTL_DEFAULT_DRIVER",
                "default_driver",
                "volctl",
            ),
        )?;
        let mount_root = FieldMetadata::new(
            "mount root",
            "VOLCTL_MOUNT_ROOT",
            "mount_root",
            "volctl",
        );
        require_field(&self.mount_root, &mount_root)?;
        if !self.mount_root.trim().starts_with('/') {
            return Err(mount_root.invalid("must be an absolute path"));
        }
        require_field(
            &self.mounts_file,
            &FieldMetadata::new(
                "mount table file",
                "VOLCTL_MOUNTS_FILE",
                "mounts_file",
                "volctl",
            ),
        )?;
        if self.wait_timeout_secs == 0 {
            return Err(FieldMetadata::new(
                "wait timeout",
                "VOLCTL_WAIT_TIMEOUT_SECS",
                "wait_timeout_secs",
                "volctl",
            )
            .invalid("must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(FieldMetadata::new(
                "poll interval",
                "VOLCTL_POLL_INTERVAL_MS",
                "poll_interval_ms",
                "volctl",
            )
            .invalid("must be positive"));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(FieldMetadata::new(
                "maximum poll interval",
                "VOLCTL_MAX_POLL_INTERVAL_MS",
                "max_poll_interval_ms",
                "volctl",
            )
            .invalid("must not be below poll_interval_ms"));
        }
        Ok(())
    }

    /// Poll cadence and deadline for synchronous waits.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.max_poll_interval_ms),
            Duration::from_secs(self.wait_timeout_secs),
        )
    }

    /// Retention window for fire-and-forget records.
    #[must_use]
    pub const fn operation_retention(&self) -> Duration {
        Duration::from_secs(self.operation_retention_secs)
    }

    /// Mount root as a path.
    #[must_use]
    pub fn mount_root_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.mount_root.trim())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_validate() {
        let config = VolctlConfig::with_defaults();
        config.validate().expect("defaults are valid");
        assert_eq!(config.wait_policy(), WaitPolicy::default());
        assert_eq!(config.operation_retention(), Duration::from_secs(600));
    }

    #[rstest]
    #[case::blank_driver(
        VolctlConfig { default_driver: String::from(" "), ..VolctlConfig::with_defaults() },
        "VOLCTL_DEFAULT_DRIVER"
    )]
    #[case::relative_root(
        VolctlConfig { mount_root: String::from("volumes"), ..VolctlConfig::with_defaults() },
        "VOLCTL_MOUNT_ROOT"
    )]
    #[case::zero_timeout(
        VolctlConfig { wait_timeout_secs: 0, ..VolctlConfig::with_defaults() },
        "VOLCTL_WAIT_TIMEOUT_SECS"
    )]
    #[case::zero_poll(
        VolctlConfig { poll_interval_ms: 0, ..VolctlConfig::with_defaults() },
        "VOLCTL_POLL_INTERVAL_MS"
    )]
    #[case::inverted_poll(
        VolctlConfig { max_poll_interval_ms: 100, ..VolctlConfig::with_defaults() },
        "VOLCTL_MAX_POLL_INTERVAL_MS"
    )]
    fn validation_names_the_source(#[case] config: VolctlConfig, #[case] env_var: &str) {
        let message = config.validate().expect_err("invalid").to_string();
        assert!(message.contains(env_var), "{message}");
        assert!(message.contains("volctl.toml"), "{message}");
    }
}
