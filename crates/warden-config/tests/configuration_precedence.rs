//! Layering of defaults, configuration files, environment and CLI flags.

use std::ffi::OsString;
use std::fs;
use std::sync::Mutex;

use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use warden_config::{
    CleanupPolicy, Config, DEFAULT_HELPER_ID, InstallerMode, SocketEndpoint, default_log_filter,
    default_log_format,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
}

impl EnvOverride {
    fn set(key: &'static str, value: &str) -> Self {
        let previous = std::env::var_os(key);
        // SAFETY: tests touching the environment hold `ENV_LOCK`.
        unsafe { std::env::set_var(key, value) };
        Self { key, previous }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            // SAFETY: restored while the test still holds `ENV_LOCK`.
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("temporary directory")
}

fn args(extra: &[&str]) -> Vec<OsString> {
    std::iter::once("warden")
        .chain(extra.iter().copied())
        .map(OsString::from)
        .collect()
}

#[rstest]
fn defaults_apply_without_overrides() {
    let _guard = ENV_LOCK.lock().expect("env lock");

    let config = Config::load_from_iter(args(&[])).expect("configuration loads");

    assert_eq!(config.helper_id(), DEFAULT_HELPER_ID);
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.installer(), InstallerMode::Legacy);
    assert_eq!(config.uninstall_cleanup(), CleanupPolicy::Strict);
}

#[rstest]
fn file_sets_socket_and_policy(temp_dir: TempDir) {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let path = temp_dir.path().join("warden.toml");
    fs::write(
        &path,
        concat!(
            "helper_socket = { transport = \"tcp\", host = \"127.0.0.1\", port = 4800 }\n",
            "uninstall_cleanup = \"best_effort\"\n",
            "installer = \"managed\"\n",
        ),
    )
    .expect("write configuration");
    let path_text = path.to_str().expect("utf8 path");

    let config =
        Config::load_from_iter(args(&["--config-path", path_text])).expect("configuration loads");

    assert_eq!(config.helper_socket(), &SocketEndpoint::tcp("127.0.0.1", 4800));
    assert_eq!(config.uninstall_cleanup(), CleanupPolicy::BestEffort);
    assert_eq!(config.installer(), InstallerMode::Managed);
}

#[rstest]
fn cli_overrides_environment() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let _env = EnvOverride::set("WARDEN_LOG_FILTER", "warn");

    let from_env = Config::load_from_iter(args(&[])).expect("configuration loads");
    let from_cli =
        Config::load_from_iter(args(&["--log-filter", "debug"])).expect("configuration loads");

    assert_eq!(from_env.log_filter(), "warn");
    assert_eq!(from_cli.log_filter(), "debug");
}
