//! Tests for configuration loading and validation.

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use rstest::*;
use tempfile::TempDir;
use volctl::config::ConfigError;
use volctl::test_support::EnvGuard;
use volctl::{ScalewayDriverConfig, VolctlConfig};

#[fixture]
fn valid_scaleway() -> ScalewayDriverConfig {
    ScalewayDriverConfig {
        secret_key: Some(String::from("SCWSECRETKEYEXAMPLE")),
        default_project_id: Some(String::from("11111111-2222-3333-4444-555555555555")),
        default_zone: String::from("fr-par-1"),
        instance_id: None,
        device_dir: String::from("/dev/disk/by-id"),
    }
}

#[rstest]
fn scaleway_validation_accepts_complete_config(valid_scaleway: ScalewayDriverConfig) {
    assert!(valid_scaleway.is_configured());
    valid_scaleway
        .validate()
        .unwrap_or_else(|err| panic!("complete config validates: {err}"));
}

#[rstest]
#[case::secret(
    |cfg: &mut ScalewayDriverConfig| cfg.secret_key = Some(String::from("  ")),
    "SCW_SECRET_KEY",
    "secret_key"
)]
#[case::project(
    |cfg: &mut ScalewayDriverConfig| cfg.default_project_id = None,
    "SCW_DEFAULT_PROJECT_ID",
    "default_project_id"
)]
#[case::zone(
    |cfg: &mut ScalewayDriverConfig| cfg.default_zone.clear(),
    "SCW_DEFAULT_ZONE",
    "default_zone"
)]
#[case::device_dir(
    |cfg: &mut ScalewayDriverConfig| cfg.device_dir.clear(),
    "SCW_DEVICE_DIR",
    "device_dir"
)]
fn scaleway_validation_errors_are_actionable(
    valid_scaleway: ScalewayDriverConfig,
    #[case] mutate: fn(&mut ScalewayDriverConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_scaleway;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::MissingField(ref message) = error else {
        panic!("expected MissingField error, got {error:?}");
    };
    assert!(message.contains(env_var), "{message}");
    assert!(message.contains(toml_key), "{message}");
    assert!(message.contains("volctl.toml"), "{message}");
}

#[rstest]
fn blank_secret_means_unconfigured(valid_scaleway: ScalewayDriverConfig) {
    let cfg = ScalewayDriverConfig {
        secret_key: Some(String::from(" ")),
        ..valid_scaleway
    };
    assert!(!cfg.is_configured());
}

#[tokio::test]
async fn environment_overrides_defaults() {
    let _guard = EnvGuard::set_vars(&[
        ("VOLCTL_MOUNT_ROOT", "/data/volumes"),
        ("VOLCTL_DEFAULT_FS_TYPE", "btrfs"),
        ("VOLCTL_WAIT_TIMEOUT_SECS", "42"),
    ])
    .await;

    let config = VolctlConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("configuration loads: {err}"));
    assert_eq!(config.mount_root, "/data/volumes");
    assert_eq!(config.default_fs_type.as_deref(), Some("btrfs"));
    assert_eq!(config.wait_timeout_secs, 42);
    assert_eq!(config.default_driver, "memory");
    config
        .validate()
        .unwrap_or_else(|err| panic!("loaded configuration validates: {err}"));
}

#[tokio::test]
async fn configuration_file_is_discovered_from_env_path() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write(
            "volctl.toml",
            "default_driver = \"scaleway\"\nmount_root = \"/srv/volctl\"\npoll_interval_ms = 250\n",
        )
        .unwrap_or_else(|err| panic!("write config: {err}"));
    let path = root.join("volctl.toml");

    let _guard = EnvGuard::set_vars(&[("VOLCTL_CONFIG_PATH", path.as_str())]).await;
    let config = VolctlConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("configuration loads: {err}"));

    assert_eq!(config.default_driver, "scaleway");
    assert_eq!(config.mount_root, "/srv/volctl");
    assert_eq!(config.poll_interval_ms, 250);
    assert_eq!(config.max_poll_interval_ms, 5000);
}
