//! Handlers for the commands every helper answers.

use std::io;

use camino::Utf8Path;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{info, warn};

use warden_config::{CleanupPolicy, InstallerMode, ServiceDescriptor};
use warden_protocol::RemoteError;

use crate::DISPATCH_TARGET;

/// Serialises uninstall attempts across every connection in the process.
static UNINSTALL_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Version recorded in the descriptor.
pub(super) fn version(descriptor: &ServiceDescriptor) -> Result<String, RemoteError> {
    match descriptor.version.as_deref().map(str::trim) {
        Some(version) if !version.is_empty() => Ok(version.to_owned()),
        _ => Err(RemoteError::BadFormat {
            message: format!("descriptor for '{}' carries no version", descriptor.helper_id),
        }),
    }
}

/// Removes the installed program and descriptor.
///
/// Files that are already gone count as removed. Managed helpers leave their
/// artefacts to the service manager.
pub(super) async fn uninstall(
    descriptor: &ServiceDescriptor,
    descriptor_path: &Utf8Path,
    mode: InstallerMode,
    policy: CleanupPolicy,
) -> Result<(), RemoteError> {
    if mode == InstallerMode::Managed {
        info!(
            target: DISPATCH_TARGET,
            helper = %descriptor.helper_id,
            "managed helper; leaving artefacts to the service manager"
        );
        return Ok(());
    }

    let _guard = UNINSTALL_LOCK.lock().await;
    for path in [descriptor.program.as_path(), descriptor_path] {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(target: DISPATCH_TARGET, %path, "removed helper artefact"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => match policy {
                CleanupPolicy::Strict => {
                    return Err(RemoteError::Cleanup {
                        message: format!("failed to remove '{path}': {error}"),
                    });
                }
                CleanupPolicy::BestEffort => {
                    warn!(target: DISPATCH_TARGET, %path, %error, "leaving helper artefact behind");
                }
            },
        }
    }
    Ok(())
}
