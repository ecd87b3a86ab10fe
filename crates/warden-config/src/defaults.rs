use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::runtime_dir;

use crate::policy::LogFormat;
use crate::socket::SocketEndpoint;
#[cfg(not(unix))]
use crate::socket::loopback;

/// Helper identifier used when none is configured.
pub const DEFAULT_HELPER_ID: &str = "dev.warden.helper";

/// TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 9787;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Service manager driven by the managed installer.
pub const DEFAULT_SERVICE_MANAGER: &str = "systemctl";

/// Credential lifetime in seconds.
pub const DEFAULT_CREDENTIAL_TTL_SECS: u64 = 300;

/// Reply timeout in milliseconds.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 30_000;

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// The helper version baked into this build.
#[must_use]
pub fn default_helper_version() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}

/// Directory receiving installed helper programs.
#[must_use]
pub fn default_install_root() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/local/libexec/warden")
}

/// Directory receiving service descriptors.
#[must_use]
pub fn default_descriptor_root() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/local/share/warden/services")
}

/// Location of the shared authority key.
#[must_use]
pub fn default_authority_key_path() -> Utf8PathBuf {
    Utf8PathBuf::from("/etc/warden/authority.key")
}

/// The `wardend` binary shipped next to the running executable.
#[must_use]
pub fn default_helper_source() -> Utf8PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("wardend")))
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("wardend"))
}

/// Computes the default socket endpoint for the helper.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    default_socket_endpoint_inner()
}

#[cfg(unix)]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    let (mut base, apply_namespace) = match runtime_base_directory() {
        Some(dir) => (dir, false),
        None => (fallback_base_directory(), true),
    };

    base.push("warden");
    if apply_namespace {
        base.push(user_namespace());
    }

    SocketEndpoint::unix(base.join(format!("{DEFAULT_HELPER_ID}.sock")))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

#[cfg(not(unix))]
fn default_socket_endpoint_inner() -> SocketEndpoint {
    loopback(DEFAULT_TCP_PORT)
}
