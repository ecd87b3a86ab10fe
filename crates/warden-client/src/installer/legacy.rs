//! Installer for helpers that own their artefacts.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::process::Command;
use tracing::{debug, info, warn};

use warden_config::{Config, InstallLayout, ServiceDescriptor, SocketEndpoint};
use warden_protocol::{Installer, InstallerError, RegistrationStatus, ServiceIdentity, is_peer_gone};

use crate::INSTALLER_TARGET;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts an installed helper program.
pub trait HelperLauncher: Send + Sync {
    /// Launches `program` serving the descriptor at `descriptor`.
    ///
    /// # Errors
    ///
    /// Fails when the program cannot be started.
    fn launch(&self, program: &Utf8Path, descriptor: &Utf8Path) -> Result<(), InstallerError>;
}

/// Launches the helper as a detached child process.
///
/// The child outlives the call; a background task waits on it so its exit
/// status is collected. Must be called within a tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl HelperLauncher for ProcessLauncher {
    fn launch(&self, program: &Utf8Path, descriptor: &Utf8Path) -> Result<(), InstallerError> {
        let mut child = Command::new(program.as_std_path())
            .arg("--descriptor")
            .arg(descriptor.as_std_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| InstallerError::io("launch", program.as_str(), source))?;
        let pid = child.id();
        debug!(target: INSTALLER_TARGET, pid, %program, "helper launched");
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(target: INSTALLER_TARGET, pid, %status, "helper exited"),
                Err(error) => warn!(target: INSTALLER_TARGET, pid, %error, "failed to reap helper"),
            }
        });
        Ok(())
    }
}

/// Copies the helper into place, publishes its descriptor and launches it.
pub struct LegacyInstaller {
    source: Utf8PathBuf,
    layout: InstallLayout,
    launcher: Arc<dyn HelperLauncher>,
    ready_timeout: Duration,
}

impl LegacyInstaller {
    /// Installer for the layout described by `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.helper_source.clone(), config.install_layout())
    }

    /// Installer copying `source` into `layout`.
    #[must_use]
    pub fn new(source: Utf8PathBuf, layout: InstallLayout) -> Self {
        Self {
            source,
            layout,
            launcher: Arc::new(ProcessLauncher),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Replaces the launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn HelperLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Bounds how long `install` waits for the helper's socket.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Layout this installer manages.
    #[must_use]
    pub const fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    async fn copy_program(&self) -> Result<(), InstallerError> {
        let program = self.layout.program();
        if program == self.source.as_path() {
            return Ok(());
        }
        if let Some(parent) = program.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| InstallerError::io("create", parent.as_str(), source))?;
        }
        tokio::fs::copy(&self.source, program)
            .await
            .map_err(|source| InstallerError::io("copy", self.source.as_str(), source))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(program, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|source| InstallerError::io("set permissions on", program.as_str(), source))?;
        }
        Ok(())
    }

    fn publish_descriptor(&self, identity: &ServiceIdentity) -> Result<(), InstallerError> {
        let descriptor = ServiceDescriptor {
            helper_id: identity.helper_id().to_owned(),
            version: Some(identity.version().to_owned()),
            program: self.layout.program().to_path_buf(),
            socket: self.layout.socket().clone(),
            authorized_clients: identity.requirement().map(str::to_owned),
        };
        descriptor
            .store(self.layout.descriptor())
            .map_err(|error| InstallerError::Failed(error.to_string()))
    }

    /// Polls until the socket's reachability equals `reachable`.
    async fn wait_for(&self, reachable: bool) -> bool {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if probe(self.layout.socket()).await == reachable {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Installer for LegacyInstaller {
    async fn install(&self, identity: &ServiceIdentity) -> Result<(), InstallerError> {
        let endpoint = self.layout.socket().to_string();
        if !self.wait_for(false).await {
            return Err(InstallerError::Failed(format!(
                "{endpoint} is still served by a previous helper"
            )));
        }
        self.copy_program().await?;
        self.publish_descriptor(identity)?;
        self.launcher
            .launch(self.layout.program(), self.layout.descriptor())?;
        if !self.wait_for(true).await {
            return Err(InstallerError::NotReady { endpoint });
        }
        info!(
            target: INSTALLER_TARGET,
            program = %self.layout.program(),
            %endpoint,
            "legacy helper ready"
        );
        Ok(())
    }

    async fn uninstall(&self, _identity: &ServiceIdentity) -> Result<(), InstallerError> {
        remove_if_present(self.layout.program()).await?;
        ServiceDescriptor::remove(self.layout.descriptor())
            .map_err(|error| InstallerError::Failed(error.to_string()))?;
        debug!(target: INSTALLER_TARGET, program = %self.layout.program(), "legacy helper removed");
        Ok(())
    }

    async fn status(&self, _identity: &ServiceIdentity) -> Result<RegistrationStatus, InstallerError> {
        let descriptor = self.layout.descriptor();
        let exists = tokio::fs::try_exists(descriptor)
            .await
            .map_err(|source| InstallerError::io("inspect", descriptor.as_str(), source))?;
        Ok(if exists {
            RegistrationStatus::Registered
        } else {
            RegistrationStatus::Unregistered
        })
    }
}

async fn remove_if_present(path: &Utf8Path) -> Result<(), InstallerError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(InstallerError::io("remove", path.as_str(), source)),
    }
}

/// Returns `true` when something accepts connections on `endpoint`.
async fn probe(endpoint: &SocketEndpoint) -> bool {
    let outcome = match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            TcpStream::connect((host.as_str(), *port)).await.map(drop)
        }
        #[cfg(unix)]
        SocketEndpoint::Unix { path } => UnixStream::connect(path.as_std_path()).await.map(drop),
        #[cfg(not(unix))]
        SocketEndpoint::Unix { .. } => Err(io::ErrorKind::Unsupported.into()),
    };
    match outcome {
        Ok(()) => true,
        Err(error) => {
            if !is_peer_gone(&error) {
                debug!(target: INSTALLER_TARGET, %endpoint, %error, "socket probe failed");
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    struct Workspace {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
        std::fs::write(root.join("source-helper"), b"#!/bin/sh\n").expect("write source");
        Workspace { _dir: dir, root }
    }

    fn layout(workspace: &Workspace, socket: SocketEndpoint) -> InstallLayout {
        InstallLayout::new(
            &workspace.root.join("bin"),
            &workspace.root.join("services"),
            "dev.test.helper",
            socket,
        )
    }

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new("dev.test.helper", "2").with_requirement("uid 0")
    }

    /// Binds a listener on the layout's socket instead of running a program.
    #[derive(Default)]
    struct ListeningLauncher {
        launches: AtomicUsize,
        #[cfg(unix)]
        listener: Mutex<Option<std::os::unix::net::UnixListener>>,
    }

    impl HelperLauncher for ListeningLauncher {
        fn launch(&self, _program: &Utf8Path, descriptor: &Utf8Path) -> Result<(), InstallerError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let published = ServiceDescriptor::load(descriptor).expect("descriptor published");
            #[cfg(unix)]
            if let Some(path) = published.socket.unix_path() {
                let listener = std::os::unix::net::UnixListener::bind(path.as_std_path())
                    .map_err(|source| InstallerError::io("bind", path.as_str(), source))?;
                *self.listener.lock() = Some(listener);
            }
            Ok(())
        }
    }

    struct SilentLauncher;

    impl HelperLauncher for SilentLauncher {
        fn launch(&self, _program: &Utf8Path, _descriptor: &Utf8Path) -> Result<(), InstallerError> {
            Ok(())
        }
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn install_copies_publishes_and_waits_for_the_socket(workspace: Workspace) {
        let socket = SocketEndpoint::unix(workspace.root.join("helper.sock"));
        let launcher = Arc::new(ListeningLauncher::default());
        let installer = LegacyInstaller::new(
            workspace.root.join("source-helper"),
            layout(&workspace, socket.clone()),
        )
        .with_launcher(Arc::clone(&launcher) as Arc<dyn HelperLauncher>);

        installer.install(&identity()).await.expect("install succeeds");

        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        let program = installer.layout().program();
        assert_eq!(std::fs::read(program).expect("program copied"), b"#!/bin/sh\n");
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(program).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
        let descriptor = ServiceDescriptor::load(installer.layout().descriptor()).expect("load");
        assert_eq!(descriptor.version.as_deref(), Some("2"));
        assert_eq!(descriptor.socket, socket);
        assert_eq!(descriptor.authorized_clients.as_deref(), Some("uid 0"));
        assert_eq!(
            installer.status(&identity()).await.expect("status"),
            RegistrationStatus::Registered
        );
    }

    #[rstest]
    #[tokio::test]
    async fn install_reports_a_helper_that_never_listens(workspace: Workspace) {
        let socket = SocketEndpoint::unix(workspace.root.join("silent.sock"));
        let installer = LegacyInstaller::new(
            workspace.root.join("source-helper"),
            layout(&workspace, socket),
        )
        .with_launcher(Arc::new(SilentLauncher))
        .with_ready_timeout(Duration::from_millis(250));

        let error = installer.install(&identity()).await.expect_err("never ready");

        assert!(matches!(error, InstallerError::NotReady { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn missing_source_fails_before_launch(workspace: Workspace) {
        let socket = SocketEndpoint::unix(workspace.root.join("unused.sock"));
        let launcher = Arc::new(ListeningLauncher::default());
        let installer = LegacyInstaller::new(workspace.root.join("absent"), layout(&workspace, socket))
            .with_launcher(Arc::clone(&launcher) as Arc<dyn HelperLauncher>);

        let error = installer.install(&identity()).await.expect_err("no source");

        assert!(matches!(error, InstallerError::Io { action: "copy", .. }));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn uninstall_is_idempotent(workspace: Workspace) {
        let socket = SocketEndpoint::unix(workspace.root.join("gone.sock"));
        let installer = LegacyInstaller::new(
            workspace.root.join("source-helper"),
            layout(&workspace, socket),
        );
        installer.copy_program().await.expect("copy");
        installer.publish_descriptor(&identity()).expect("publish");

        installer.uninstall(&identity()).await.expect("first uninstall");
        installer.uninstall(&identity()).await.expect("second uninstall");

        assert!(!installer.layout().program().exists());
        assert_eq!(
            installer.status(&identity()).await.expect("status"),
            RegistrationStatus::Unregistered
        );
    }

    #[cfg(unix)]
    #[rstest]
    #[tokio::test]
    async fn process_launcher_passes_the_descriptor(workspace: Workspace) {
        use std::os::unix::fs::PermissionsExt;

        let program = workspace.root.join("record-args");
        let record = workspace.root.join("args.txt");
        std::fs::write(&program, format!("#!/bin/sh\necho \"$*\" > '{record}'\n"))
            .expect("write program");
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755))
            .expect("chmod program");
        let descriptor = workspace.root.join("helper.json");

        ProcessLauncher.launch(&program, &descriptor).expect("launches");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut args = String::new();
        while !args.ends_with('\n') && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
            args = std::fs::read_to_string(&record).unwrap_or_default();
        }
        assert_eq!(args.trim(), format!("--descriptor {descriptor}"));
    }

    #[rstest]
    #[tokio::test]
    async fn process_launcher_reports_a_missing_program(workspace: Workspace) {
        let error = ProcessLauncher
            .launch(&workspace.root.join("absent"), &workspace.root.join("helper.json"))
            .expect_err("cannot launch");

        assert!(matches!(error, InstallerError::Io { action: "launch", .. }));
    }
}
