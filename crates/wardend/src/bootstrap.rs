//! Helper bootstrap orchestration.

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::debug;

use warden_config::{
    Config, DescriptorError, ServiceDescriptor, SocketEndpoint, SocketPreparationError,
};
use warden_protocol::{CommandRegistry, CredentialAuthority, IdentityVerifier};

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{ListenerError, SocketListener};
use crate::{HEALTH_TARGET, HelperService};

/// Loads the helper configuration.
pub trait ConfigLoader: Send + Sync {
    /// Loads the helper configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that layers the given arguments over the environment and any
/// configuration file.
#[derive(Debug, Clone, Default)]
pub struct SystemConfigLoader {
    args: Vec<OsString>,
}

impl SystemConfigLoader {
    /// Loader for `args`, program name first.
    #[must_use]
    pub fn new<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter(self.args.iter().cloned())
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Loader always yielding `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The service descriptor exists but could not be read.
    #[error("failed to load service descriptor: {source}")]
    Descriptor {
        /// Underlying descriptor error.
        #[source]
        source: DescriptorError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare helper socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
}

/// A bootstrapped helper, ready to bind its socket.
pub struct Helper {
    config: Config,
    descriptor: ServiceDescriptor,
    descriptor_path: Utf8PathBuf,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Helper {
    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Descriptor the helper serves.
    #[must_use]
    pub const fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Where the descriptor lives on disk.
    #[must_use]
    pub fn descriptor_path(&self) -> &Utf8Path {
        &self.descriptor_path
    }

    /// Telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Builds the request service for this helper.
    ///
    /// Installer mode and cleanup policy come from the configuration.
    #[must_use]
    pub fn service(
        &self,
        registry: Arc<CommandRegistry>,
        authority: Arc<dyn CredentialAuthority>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> HelperService {
        HelperService::new(
            registry,
            authority,
            verifier,
            self.descriptor.clone(),
            self.descriptor_path.clone(),
        )
        .with_installer_mode(self.config.installer())
        .with_cleanup_policy(self.config.uninstall_cleanup())
    }

    /// Binds the descriptor's socket and reports readiness.
    ///
    /// # Errors
    ///
    /// Fails when the endpoint cannot be bound.
    pub async fn listen(&self) -> Result<SocketListener, ListenerError> {
        let listener = SocketListener::bind(&self.descriptor.socket).await?;
        let endpoint = listener.local_endpoint()?;
        self.reporter.listener_ready(&endpoint);
        Ok(listener)
    }

    /// Reports that the helper is shutting down.
    pub fn shutting_down(&self) {
        self.reporter.shutdown_started();
    }
}

/// Bootstraps the helper.
///
/// The descriptor is read from `descriptor_path`, defaulting to the installed
/// layout. A missing descriptor is synthesised from the configuration so the
/// helper can be run by hand.
///
/// # Errors
///
/// Every failure is reported to `reporter` before it is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    descriptor_path: Option<&Utf8Path>,
) -> Result<Helper, BootstrapError> {
    reporter.bootstrap_starting();
    let fail = |error: BootstrapError| {
        reporter.bootstrap_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(BootstrapError::Configuration { source }))?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| fail(BootstrapError::Telemetry { source }))?;

    let layout = config.install_layout();
    let descriptor_path = descriptor_path.unwrap_or_else(|| layout.descriptor());
    let descriptor = load_descriptor(&config, descriptor_path)
        .map_err(|source| fail(BootstrapError::Descriptor { source }))?;
    descriptor
        .socket
        .prepare_filesystem()
        .map_err(|source| fail(BootstrapError::Socket { source }))?;

    reporter.bootstrap_succeeded(&config, &descriptor);
    Ok(Helper {
        config,
        descriptor,
        descriptor_path: descriptor_path.to_path_buf(),
        telemetry,
        reporter,
    })
}

fn load_descriptor(config: &Config, path: &Utf8Path) -> Result<ServiceDescriptor, DescriptorError> {
    match ServiceDescriptor::load(path) {
        Err(error) if error.is_missing() => {
            debug!(
                target: HEALTH_TARGET,
                %path,
                "no service descriptor; describing the helper from configuration"
            );
            Ok(fallback_descriptor(config))
        }
        other => other,
    }
}

fn fallback_descriptor(config: &Config) -> ServiceDescriptor {
    let layout = config.install_layout();
    ServiceDescriptor {
        helper_id: config.helper_id().to_owned(),
        version: Some(config.helper_version().to_owned()),
        program: layout.program().to_path_buf(),
        socket: layout.socket().clone(),
        authorized_clients: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Starting,
        Succeeded(Option<String>),
        Failed(String),
    }

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingReporter {
        fn events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().expect("events lock"))
        }

        fn push(&self, event: Event) {
            self.events.lock().expect("events lock").push(event);
        }
    }

    impl HealthReporter for RecordingReporter {
        fn bootstrap_starting(&self) {
            self.push(Event::Starting);
        }

        fn bootstrap_succeeded(&self, _config: &Config, descriptor: &ServiceDescriptor) {
            self.push(Event::Succeeded(descriptor.version.clone()));
        }

        fn bootstrap_failed(&self, error: &BootstrapError) {
            self.push(Event::Failed(error.to_string()));
        }

        fn listener_ready(&self, _endpoint: &SocketEndpoint) {}

        fn shutdown_started(&self) {}
    }

    fn utf8_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir")
    }

    fn config(root: &Utf8Path) -> Config {
        Config {
            helper_version: "7".to_owned(),
            install_root: root.join("helpers"),
            descriptor_root: root.join("services"),
            helper_socket: SocketEndpoint::unix(root.join("run/helper.sock")),
            ..Config::default()
        }
    }

    #[test]
    fn invalid_configuration_is_reported() {
        let reporter = Arc::new(RecordingReporter::default());
        let loader =
            SystemConfigLoader::new(["wardend", "--helper-socket", "invalid://socket"]);

        let outcome = bootstrap_with(&loader, Arc::clone(&reporter) as _, None);

        assert!(matches!(outcome, Err(BootstrapError::Configuration { .. })));
        let events = reporter.events();
        assert_eq!(events.first(), Some(&Event::Starting));
        assert!(matches!(events.last(), Some(Event::Failed(message)) if message.contains("configuration")));
    }

    #[test]
    fn missing_descriptor_falls_back_to_configuration() {
        let dir = TempDir::new().expect("temp dir");
        let root = utf8_root(&dir);
        let reporter = Arc::new(RecordingReporter::default());
        let loader = StaticConfigLoader::new(config(&root));

        let helper =
            bootstrap_with(&loader, Arc::clone(&reporter) as _, None).expect("bootstrap");

        assert_eq!(helper.descriptor().version.as_deref(), Some("7"));
        assert_eq!(helper.descriptor().authorized_clients, None);
        assert_eq!(
            helper.descriptor_path(),
            root.join(format!("services/{}.json", helper.config().helper_id()))
        );
        assert!(root.join("run").is_dir(), "socket directory prepared");
        assert_eq!(
            reporter.events(),
            vec![Event::Starting, Event::Succeeded(Some("7".to_owned()))]
        );
    }

    #[rstest]
    #[case(Some("3"))]
    #[case(None)]
    fn published_descriptor_wins(#[case] version: Option<&str>) {
        let dir = TempDir::new().expect("temp dir");
        let root = utf8_root(&dir);
        let path = root.join("published.json");
        ServiceDescriptor {
            helper_id: "dev.test.helper".to_owned(),
            version: version.map(str::to_owned),
            program: root.join("helpers/dev.test.helper"),
            socket: SocketEndpoint::tcp("127.0.0.1", 0),
            authorized_clients: Some("uid == 0".to_owned()),
        }
        .store(&path)
        .expect("descriptor stored");
        let loader = StaticConfigLoader::new(config(&root));

        let helper = bootstrap_with(&loader, Arc::new(RecordingReporter::default()), Some(&path))
            .expect("bootstrap");

        assert_eq!(helper.descriptor().version.as_deref(), version);
        assert_eq!(helper.descriptor().authorized_clients.as_deref(), Some("uid == 0"));
        assert_eq!(helper.descriptor_path(), path);
    }

    #[test]
    fn corrupt_descriptor_fails_bootstrap() {
        let dir = TempDir::new().expect("temp dir");
        let root = utf8_root(&dir);
        let path = root.join("corrupt.json");
        std::fs::write(&path, "{ not json").expect("write descriptor");
        let reporter = Arc::new(RecordingReporter::default());
        let loader = StaticConfigLoader::new(config(&root));

        let outcome = bootstrap_with(&loader, Arc::clone(&reporter) as _, Some(&path));

        assert!(matches!(outcome, Err(BootstrapError::Descriptor { .. })));
        assert!(matches!(reporter.events().last(), Some(Event::Failed(_))));
    }
}
