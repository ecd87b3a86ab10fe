//! Installer delegating the helper's lifecycle to the OS service manager.

use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use warden_protocol::{Installer, InstallerError, RegistrationStatus, ServiceIdentity};

use crate::INSTALLER_TARGET;

/// Drives `<service_manager> enable|restart|disable|is-enabled <helper>.service`.
///
/// `install` always restarts the unit, so a running helper of another version
/// is replaced by the installed one.
#[derive(Debug, Clone)]
pub struct ManagedInstaller {
    program: String,
}

impl ManagedInstaller {
    /// Installer invoking `program`, e.g. `systemctl`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Service manager program.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[&str]) -> Result<ExitStatus, InstallerError> {
        debug!(target: INSTALLER_TARGET, program = %self.program, ?args, "running service manager");
        Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|error| InstallerError::ServiceManager {
                program: self.program.clone(),
                message: error.to_string(),
            })
    }

    async fn run_checked(&self, args: &[&str]) -> Result<(), InstallerError> {
        let status = self.run(args).await?;
        if status.success() {
            return Ok(());
        }
        Err(InstallerError::ServiceManager {
            program: self.program.clone(),
            message: format!("`{}` exited with {status}", args.join(" ")),
        })
    }
}

fn unit_name(identity: &ServiceIdentity) -> String {
    format!("{}.service", identity.helper_id())
}

#[async_trait]
impl Installer for ManagedInstaller {
    async fn install(&self, identity: &ServiceIdentity) -> Result<(), InstallerError> {
        let unit = unit_name(identity);
        self.run_checked(&["enable", &unit]).await?;
        self.run_checked(&["restart", &unit]).await?;
        info!(target: INSTALLER_TARGET, %unit, "service enabled and restarted");
        Ok(())
    }

    async fn uninstall(&self, identity: &ServiceIdentity) -> Result<(), InstallerError> {
        if self.status(identity).await? == RegistrationStatus::Unregistered {
            debug!(target: INSTALLER_TARGET, helper = identity.helper_id(), "service already disabled");
            return Ok(());
        }
        let unit = unit_name(identity);
        self.run_checked(&["disable", "--now", &unit]).await?;
        info!(target: INSTALLER_TARGET, %unit, "service disabled");
        Ok(())
    }

    async fn status(&self, identity: &ServiceIdentity) -> Result<RegistrationStatus, InstallerError> {
        let unit = unit_name(identity);
        let status = self.run(&["is-enabled", &unit]).await?;
        Ok(match status.code() {
            Some(0) => RegistrationStatus::Registered,
            Some(1) => RegistrationStatus::Unregistered,
            _ => RegistrationStatus::Unknown,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use rstest::rstest;

    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("dev.test.helper", "1")
    }

    #[rstest]
    #[case("true", RegistrationStatus::Registered)]
    #[case("false", RegistrationStatus::Unregistered)]
    #[tokio::test]
    async fn exit_codes_map_to_registration(
        #[case] program: &str,
        #[case] expected: RegistrationStatus,
    ) {
        let installer = ManagedInstaller::new(program);

        let status = installer.status(&identity()).await.expect("status");

        assert_eq!(status, expected);
    }

    #[tokio::test]
    async fn failed_enable_is_reported() {
        let error = ManagedInstaller::new("false")
            .install(&identity())
            .await
            .expect_err("enable fails");

        assert!(matches!(error, InstallerError::ServiceManager { ref program, .. } if program == "false"));
    }

    #[tokio::test]
    async fn uninstalling_a_disabled_unit_succeeds() {
        ManagedInstaller::new("false")
            .uninstall(&identity())
            .await
            .expect("already disabled");
    }

    /// Service manager script appending each invocation to `calls.log`.
    fn recording_service_manager(dir: &std::path::Path) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("service-manager");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$*\" >> '{}'\n", log.display()),
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        (script.display().to_string(), log)
    }

    #[tokio::test]
    async fn install_restarts_a_running_unit() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (program, log) = recording_service_manager(dir.path());

        ManagedInstaller::new(program)
            .install(&identity())
            .await
            .expect("install succeeds");

        let calls = std::fs::read_to_string(log).expect("calls logged");
        assert_eq!(
            calls,
            "enable dev.test.helper.service\nrestart dev.test.helper.service\n"
        );
    }

    #[tokio::test]
    async fn missing_service_manager_is_an_error() {
        let error = ManagedInstaller::new("/nonexistent/service-manager")
            .status(&identity())
            .await
            .expect_err("cannot run");

        assert!(matches!(error, InstallerError::ServiceManager { .. }));
    }
}
