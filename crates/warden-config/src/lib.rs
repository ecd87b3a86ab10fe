//! Shared configuration for the warden client and the privileged helper.
//!
//! Both binaries resolve the same [`Config`] through `ortho_config`, layering
//! command-line flags over `WARDEN_*` environment variables over an optional
//! TOML file passed with `--config-path`. The helper's socket, its installed
//! layout and the service descriptor it publishes are all derived from the
//! values here so that client and helper agree on where to find each other.

mod defaults;
mod descriptor;
mod layout;
mod policy;
mod socket;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CREDENTIAL_TTL_SECS, DEFAULT_HELPER_ID, DEFAULT_LOG_FILTER, DEFAULT_REPLY_TIMEOUT_MS,
    DEFAULT_SERVICE_MANAGER, DEFAULT_TCP_PORT, default_authority_key_path,
    default_descriptor_root, default_helper_source, default_helper_version, default_install_root,
    default_log_filter, default_log_format, default_socket_endpoint,
};
pub use descriptor::{DescriptorError, ServiceDescriptor};
pub use layout::InstallLayout;
pub use policy::{CleanupPolicy, InstallerMode, LogFormat, PolicyParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError, loopback};

/// Resolved configuration shared by `warden` and `wardend`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "WARDEN")]
pub struct Config {
    /// Identifier of the privileged helper, e.g. `dev.warden.helper`.
    #[ortho_config(default = defaults::DEFAULT_HELPER_ID.to_owned())]
    pub helper_id: String,
    /// Socket the helper listens on and the client connects to.
    #[ortho_config(default = defaults::default_socket_endpoint())]
    pub helper_socket: SocketEndpoint,
    /// Version the client expects the running helper to report.
    #[ortho_config(default = defaults::default_helper_version())]
    pub helper_version: String,
    /// Directory holding installed helper programs.
    #[ortho_config(default = defaults::default_install_root())]
    pub install_root: Utf8PathBuf,
    /// Directory holding published service descriptors.
    #[ortho_config(default = defaults::default_descriptor_root())]
    pub descriptor_root: Utf8PathBuf,
    /// Helper binary copied into place by the legacy installer.
    #[ortho_config(default = defaults::default_helper_source())]
    pub helper_source: Utf8PathBuf,
    /// Which installer owns the helper's lifecycle.
    #[ortho_config(default = InstallerMode::default())]
    pub installer: InstallerMode,
    /// How strictly the uninstall built-in treats cleanup failures.
    #[ortho_config(default = CleanupPolicy::default())]
    pub uninstall_cleanup: CleanupPolicy,
    /// Service manager program driven by the managed installer.
    #[ortho_config(default = defaults::DEFAULT_SERVICE_MANAGER.to_owned())]
    pub service_manager: String,
    /// Shared key used to seal and verify credentials.
    #[ortho_config(default = defaults::default_authority_key_path())]
    pub authority_key_path: Utf8PathBuf,
    /// Lifetime of a sealed credential in seconds.
    #[ortho_config(default = defaults::DEFAULT_CREDENTIAL_TTL_SECS)]
    pub credential_ttl_secs: u64,
    /// Upper bound on how long the client waits for a reply.
    #[ortho_config(default = defaults::DEFAULT_REPLY_TIMEOUT_MS)]
    pub reply_timeout_ms: u64,
    /// Tracing filter expression.
    #[ortho_config(default = defaults::DEFAULT_LOG_FILTER.to_owned())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            helper_id: DEFAULT_HELPER_ID.to_owned(),
            helper_socket: default_socket_endpoint(),
            helper_version: default_helper_version(),
            install_root: default_install_root(),
            descriptor_root: default_descriptor_root(),
            helper_source: default_helper_source(),
            installer: InstallerMode::default(),
            uninstall_cleanup: CleanupPolicy::default(),
            service_manager: DEFAULT_SERVICE_MANAGER.to_owned(),
            authority_key_path: default_authority_key_path(),
            credential_ttl_secs: DEFAULT_CREDENTIAL_TTL_SECS,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Helper identifier.
    #[must_use]
    pub fn helper_id(&self) -> &str {
        &self.helper_id
    }

    /// Socket endpoint of the helper.
    #[must_use]
    pub fn helper_socket(&self) -> &SocketEndpoint {
        &self.helper_socket
    }

    /// Version the client expects.
    #[must_use]
    pub fn helper_version(&self) -> &str {
        &self.helper_version
    }

    /// Installer mode.
    #[must_use]
    pub const fn installer(&self) -> InstallerMode {
        self.installer
    }

    /// Cleanup policy applied by the uninstall built-in.
    #[must_use]
    pub const fn uninstall_cleanup(&self) -> CleanupPolicy {
        self.uninstall_cleanup
    }

    /// Service manager program.
    #[must_use]
    pub fn service_manager(&self) -> &str {
        &self.service_manager
    }

    /// Path to the authority key file.
    #[must_use]
    pub fn authority_key_path(&self) -> &camino::Utf8Path {
        &self.authority_key_path
    }

    /// Credential lifetime.
    #[must_use]
    pub const fn credential_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.credential_ttl_secs)
    }

    /// Reply timeout.
    #[must_use]
    pub const fn reply_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reply_timeout_ms)
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Installed layout derived from this configuration.
    #[must_use]
    pub fn install_layout(&self) -> InstallLayout {
        InstallLayout::from_config(self)
    }
}
