//! Helper-side command dispatch.
//!
//! [`HelperService`] owns the command catalogue, the handler table and the
//! [`ServerGate`]. Each inbound [`RequestFrame`] runs through the same
//! pipeline: decode the envelope, resolve the command, check the expected
//! version, authorize the caller, then run the built-in or custom handler.

mod builtins;
mod errors;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use warden_config::{CleanupPolicy, InstallerMode, ServiceDescriptor};
use warden_protocol::{
    BuiltInCommand, CommandRegistry, CommandSpec, CredentialAuthority, Envelope, EnvelopeCodec,
    IdentityVerifier, PeerIdentity, RemoteError, ReplyFrame, ReplyOutcome, RequestFrame,
    ResolvedCommand, ServerGate, decode_body, encode_body, validate_types,
};

use crate::DISPATCH_TARGET;

pub use errors::{HandlerError, HandlerRegistrationError};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteError>> + Send>>;
type ErasedHandler = Arc<dyn Fn(Value, HandlerContext) -> HandlerFuture + Send + Sync>;

/// What a handler knows about the request it serves.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    peer: PeerIdentity,
    command: String,
}

impl HandlerContext {
    /// Identity of the connected client.
    #[must_use]
    pub const fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Name of the command being served.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Result of handling one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Reply to send, absent for fire-and-forget commands.
    pub reply: Option<ReplyFrame>,
    /// The helper should stop serving once the reply is written.
    pub shutdown: bool,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Decoding,
    VersionCheck,
    Authorizing,
    Dispatching,
    Replying,
}

impl Stage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Decoding => "decoding",
            Self::VersionCheck => "version_check",
            Self::Authorizing => "authorizing",
            Self::Dispatching => "dispatching",
            Self::Replying => "replying",
        }
    }
}

fn enter(stage: Stage, id: u64, command: &str) {
    debug!(target: DISPATCH_TARGET, id, command, stage = stage.as_str(), "pipeline stage");
}

struct Completed {
    body: Value,
    shutdown: bool,
}

impl Completed {
    const fn reply(body: Value) -> Self {
        Self {
            body,
            shutdown: false,
        }
    }
}

/// Serves registered commands on behalf of connected clients.
pub struct HelperService {
    registry: Arc<CommandRegistry>,
    handlers: HashMap<String, ErasedHandler>,
    gate: ServerGate,
    verifier: Arc<dyn IdentityVerifier>,
    codec: EnvelopeCodec,
    descriptor: ServiceDescriptor,
    descriptor_path: Utf8PathBuf,
    installer: InstallerMode,
    cleanup: CleanupPolicy,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for HelperService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HelperService")
            .field("helper_id", &self.descriptor.helper_id)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("installer", &self.installer)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

impl HelperService {
    /// Builds a service for the helper described by `descriptor`.
    ///
    /// Every command in `registry` has its right defined with `authority`;
    /// existing definitions are left alone.
    #[must_use]
    pub fn new(
        registry: Arc<CommandRegistry>,
        authority: Arc<dyn CredentialAuthority>,
        verifier: Arc<dyn IdentityVerifier>,
        descriptor: ServiceDescriptor,
        descriptor_path: impl Into<Utf8PathBuf>,
    ) -> Self {
        for definition in registry.rights() {
            if authority.define_right(&definition) {
                debug!(target: DISPATCH_TARGET, right = definition.name(), "right defined");
            }
        }
        let codec = EnvelopeCodec::new(authority.minimum_external_form_len());
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            handlers: HashMap::new(),
            gate: ServerGate::new(authority, Arc::clone(&verifier)),
            verifier,
            codec,
            descriptor,
            descriptor_path: descriptor_path.into(),
            installer: InstallerMode::default(),
            cleanup: CleanupPolicy::default(),
            shutdown,
        }
    }

    /// Who owns the helper's artefacts.
    #[must_use]
    pub const fn with_installer_mode(mut self, mode: InstallerMode) -> Self {
        self.installer = mode;
        self
    }

    /// How uninstall treats removal failures.
    #[must_use]
    pub const fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup = policy;
        self
    }

    /// Descriptor of the running helper.
    #[must_use]
    pub const fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Path the descriptor was loaded from.
    #[must_use]
    pub fn descriptor_path(&self) -> &Utf8Path {
        &self.descriptor_path
    }

    /// Command catalogue served by this helper.
    #[must_use]
    pub const fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Installs the handler for a custom command.
    ///
    /// # Errors
    ///
    /// Fails when the command is a built-in, is not in the registry, already
    /// has a handler, or declares different request or response types.
    pub fn set_handler<Req, Resp, F, Fut>(
        &mut self,
        spec: &CommandSpec,
        handler: F,
    ) -> Result<(), HandlerRegistrationError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        let command = spec.name().to_owned();
        if BuiltInCommand::from_name(&command).is_some() {
            return Err(HandlerRegistrationError::BuiltIn { command });
        }
        if !self.registry.contains(spec) {
            return Err(HandlerRegistrationError::UnknownCommand { command });
        }
        validate_types::<Req, Resp>(spec)?;
        if self.handlers.contains_key(&command) {
            return Err(HandlerRegistrationError::Duplicate { command });
        }

        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |body, context| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request: Req = decode_body(body)?;
                let response = (*handler)(request, context).await?;
                Ok(encode_body(&response)?)
            })
        });
        debug!(target: DISPATCH_TARGET, command = %command, "handler installed");
        self.handlers.insert(command, erased);
        Ok(())
    }

    /// Returns `true` when `peer` may open a connection at all.
    pub async fn admits(&self, peer: &PeerIdentity) -> bool {
        match self.descriptor.authorized_clients.as_deref() {
            Some(requirement) => self.verifier.verify(peer, requirement).await,
            None => true,
        }
    }

    /// Asks every listener serving this helper to stop.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Watches for [`Self::request_shutdown`].
    #[must_use]
    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Runs one request through the pipeline.
    ///
    /// Fire-and-forget commands produce no reply, even on failure. Unknown
    /// commands are always answered.
    pub async fn handle_frame(&self, frame: RequestFrame, peer: &PeerIdentity) -> Dispatched {
        let RequestFrame {
            id,
            command,
            envelope,
        } = frame;
        let resolved = self.registry.lookup(&command);
        let wants_reply = resolved.is_none_or(|found| found.spec().response().expects_reply());

        let (outcome, shutdown) = match self.run(id, &command, resolved, &envelope, peer).await {
            Ok(completed) => {
                enter(Stage::Replying, id, &command);
                self.codec
                    .encode(&Envelope::reply(completed.body))
                    .map(|bytes| (ReplyOutcome::Ok { envelope: bytes }, completed.shutdown))
                    .unwrap_or_else(|error| {
                        (ReplyOutcome::Error { error: error.into() }, completed.shutdown)
                    })
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, id, command = %command, %error, "request failed");
                (ReplyOutcome::Error { error }, false)
            }
        };

        if !wants_reply {
            if let ReplyOutcome::Error { error } = &outcome {
                warn!(
                    target: DISPATCH_TARGET,
                    id,
                    command = %command,
                    %error,
                    "fire-and-forget command failed"
                );
            }
            return Dispatched {
                reply: None,
                shutdown,
            };
        }
        Dispatched {
            reply: Some(ReplyFrame { id, outcome }),
            shutdown,
        }
    }

    async fn run(
        &self,
        id: u64,
        command: &str,
        resolved: Option<ResolvedCommand<'_>>,
        bytes: &[u8],
        peer: &PeerIdentity,
    ) -> Result<Completed, RemoteError> {
        enter(Stage::Decoding, id, command);
        let envelope = self.codec.decode_raw(bytes)?;
        let resolved = resolved.ok_or_else(|| RemoteError::UnknownCommand {
            command: command.to_owned(),
        })?;

        enter(Stage::VersionCheck, id, command);
        if let Some(expected) = envelope.expected_version {
            let actual = self.descriptor.version.clone().unwrap_or_default();
            if expected != actual {
                return Err(RemoteError::VersionMismatch { expected, actual });
            }
        }

        enter(Stage::Authorizing, id, command);
        let token = self
            .gate
            .authorize(envelope.authorization.as_deref(), resolved.spec(), peer)
            .await?;

        enter(Stage::Dispatching, id, command);
        let context = HandlerContext {
            peer: peer.clone(),
            command: command.to_owned(),
        };
        let outcome = self.dispatch(resolved, envelope.body, context).await;
        self.gate.authority().release(&token);
        outcome
    }

    async fn dispatch(
        &self,
        resolved: ResolvedCommand<'_>,
        body: Value,
        context: HandlerContext,
    ) -> Result<Completed, RemoteError> {
        match resolved {
            ResolvedCommand::BuiltIn(BuiltInCommand::GetVersion) => {
                let version = builtins::version(&self.descriptor)?;
                Ok(Completed::reply(encode_body(&version)?))
            }
            ResolvedCommand::BuiltIn(BuiltInCommand::UninstallHelperTool) => {
                builtins::uninstall(
                    &self.descriptor,
                    &self.descriptor_path,
                    self.installer,
                    self.cleanup,
                )
                .await?;
                Ok(Completed {
                    body: Value::Null,
                    shutdown: self.installer == InstallerMode::Legacy,
                })
            }
            ResolvedCommand::Custom(spec) => {
                let handler = self
                    .handlers
                    .get(spec.name())
                    .ok_or_else(|| RemoteError::Unhandled {
                        command: spec.name().to_owned(),
                    })?;
                handler(body, context).await.map(Completed::reply)
            }
        }
    }
}
