//! Installers that put the helper in place.
//!
//! In legacy mode the helper owns its artefacts: the client copies the
//! program, publishes a descriptor and launches it. In managed mode the OS
//! service manager owns the lifecycle and the client only asks it to enable
//! or disable the unit.

mod legacy;
mod managed;

use std::sync::Arc;

use warden_config::{Config, InstallerMode};
use warden_protocol::Installer;

pub use legacy::{HelperLauncher, LegacyInstaller, ProcessLauncher};
pub use managed::ManagedInstaller;

/// Selects the installer configured by `config.installer`.
#[must_use]
pub fn installer_for(config: &Config) -> Arc<dyn Installer> {
    match config.installer() {
        InstallerMode::Legacy => Arc::new(LegacyInstaller::from_config(config)),
        InstallerMode::Managed => Arc::new(ManagedInstaller::new(config.service_manager())),
    }
}
