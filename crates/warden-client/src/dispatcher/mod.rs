//! Client-side command dispatch.
//!
//! A [`ClientDispatcher`] owns one authorization token for its lifetime. Each
//! call validates the command's type contract, pre-authorizes the token for
//! that command, sends the request and waits for exactly one reply. When the
//! helper is unreachable or reports a different version, the dispatcher
//! reinstalls it and retries once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use warden_protocol::{
    BuiltInCommand, ClientGate, CommandRegistry, CommandSpec, Connector, CredentialAuthority,
    Envelope, EnvelopeCodec, Installer, Interaction, RegistrationStatus,
    ReplyOutcome, RightDefinition, Rule, ServiceIdentity, Token, UNINSTALL_HELPER_TOOL,
    decode_body, encode_body, validate_types,
};

use crate::DISPATCH_TARGET;
use crate::error::ClientError;

/// Right required to install or replace the helper.
pub const INSTALL_RIGHT: &str = "warden.install-helper";
/// Right required to remove the helper.
pub const MODIFY_RIGHT: &str = "warden.modify-services";

/// Default bound on waiting for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-dispatcher call behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Reinstall and retry once when the helper is unreachable or stale.
    pub reinstall_if_invalid: bool,
    /// Upper bound on waiting for each reply.
    pub reply_timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            reinstall_if_invalid: true,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

/// Phases of a single call, logged as the call progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Preauthorized,
    Connected,
    AwaitingReply,
    Succeeded,
    Reinstalling,
}

/// Sends commands to the privileged helper.
pub struct ClientDispatcher {
    identity: ServiceIdentity,
    registry: Arc<CommandRegistry>,
    authority: Arc<dyn CredentialAuthority>,
    gate: ClientGate,
    installer: Arc<dyn Installer>,
    connector: Arc<dyn Connector>,
    codec: EnvelopeCodec,
    options: CallOptions,
    token: Mutex<Option<Token>>,
}

impl ClientDispatcher {
    /// Builds a dispatcher and registers every command's right with the
    /// authority.
    #[must_use]
    pub fn new(
        identity: ServiceIdentity,
        registry: Arc<CommandRegistry>,
        authority: Arc<dyn CredentialAuthority>,
        installer: Arc<dyn Installer>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let installer_rights = [
            RightDefinition::new(
                INSTALL_RIGHT,
                Rule::AUTHENTICATE_ADMIN,
                Some("Install the privileged helper.".to_owned()),
            ),
            RightDefinition::new(
                MODIFY_RIGHT,
                Rule::AUTHENTICATE_ADMIN,
                Some("Remove the privileged helper.".to_owned()),
            ),
        ];
        for definition in registry.rights().chain(installer_rights) {
            if authority.define_right(&definition) {
                debug!(target: DISPATCH_TARGET, right = definition.name(), "right defined");
            }
        }
        Self {
            identity,
            registry,
            gate: ClientGate::new(Arc::clone(&authority)),
            codec: EnvelopeCodec::new(authority.minimum_external_form_len()),
            authority,
            installer,
            connector,
            options: CallOptions::default(),
            token: Mutex::new(None),
        }
    }

    /// Replaces the call options.
    #[must_use]
    pub const fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Identity of the helper this dispatcher talks to.
    #[must_use]
    pub const fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Command registry.
    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Invokes `spec` with `request` and returns the typed reply.
    ///
    /// `uninstallHelperTool` is handled locally by
    /// [`Self::uninstall_helper_tool`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TypeContractViolation`] before any I/O when
    /// `Req` or `Resp` differ from the declaration. Unreachable or stale
    /// helpers are reinstalled once; every other failure is returned as-is.
    pub async fn call<Req, Resp>(&self, spec: &CommandSpec, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + Sync + 'static,
        Resp: DeserializeOwned + 'static,
    {
        validate_types::<Req, Resp>(spec)?;
        if !self.registry.contains(spec) {
            return Err(ClientError::UnknownCommand {
                command: spec.name().to_owned(),
            });
        }
        if spec.name() == UNINSTALL_HELPER_TOOL {
            self.uninstall_helper_tool().await?;
            return Ok(decode_body(Value::Null)?);
        }

        let body = encode_body(request)?;
        let reply = match self.attempt(spec, &body).await {
            Err(error) if error.is_recoverable() && self.options.reinstall_if_invalid => {
                info!(
                    target: DISPATCH_TARGET,
                    command = spec.name(),
                    %error,
                    "helper unavailable or stale; reinstalling"
                );
                self.log_state(spec, CallState::Reinstalling);
                self.install_helper_tool().await?;
                self.attempt(spec, &body).await?
            }
            other => other?,
        };
        Ok(decode_body(reply)?)
    }

    /// Asks the running helper for its version without repairing it.
    ///
    /// # Errors
    ///
    /// Fails when the helper is unreachable or answers with an error.
    pub async fn helper_version(&self) -> Result<String, ClientError> {
        let reply = self.attempt(BuiltInCommand::GetVersion.spec(), &Value::Null).await?;
        Ok(decode_body(reply)?)
    }

    /// Installs the helper, replacing any running instance.
    ///
    /// # Errors
    ///
    /// Fails when the install right is refused or the installer fails.
    pub async fn install_helper_tool(&self) -> Result<(), ClientError> {
        if let Err(error) = self.uninstall_running_helper().await {
            debug!(target: DISPATCH_TARGET, %error, "no running helper to remove before install");
        }
        self.extend_interactively(INSTALL_RIGHT).await?;
        self.installer.install(&self.identity).await?;
        self.connector.invalidate();
        info!(
            target: DISPATCH_TARGET,
            helper = self.identity.helper_id(),
            version = self.identity.version(),
            "helper installed"
        );
        Ok(())
    }

    /// Removes the helper and releases this dispatcher's token.
    ///
    /// Removing an absent helper succeeds.
    ///
    /// # Errors
    ///
    /// Fails when the modify right is refused or the installer fails.
    pub async fn uninstall_helper_tool(&self) -> Result<(), ClientError> {
        self.extend_interactively(MODIFY_RIGHT).await?;
        if let Err(error) = self.uninstall_running_helper().await {
            debug!(target: DISPATCH_TARGET, %error, "helper did not acknowledge uninstall");
        }
        self.installer.uninstall(&self.identity).await?;
        self.connector.invalidate();
        self.release_token().await;
        info!(target: DISPATCH_TARGET, helper = self.identity.helper_id(), "helper uninstalled");
        Ok(())
    }

    /// Reports whether the helper is registered with the OS.
    ///
    /// # Errors
    ///
    /// Fails when the installer cannot query the registration.
    pub async fn registration_status(&self) -> Result<RegistrationStatus, ClientError> {
        Ok(self.installer.status(&self.identity).await?)
    }

    /// Releases the token. The dispatcher stays usable; a new token is
    /// created on the next call.
    pub async fn shutdown(&self) {
        self.release_token().await;
    }

    async fn uninstall_running_helper(&self) -> Result<(), ClientError> {
        self.attempt(BuiltInCommand::UninstallHelperTool.spec(), &Value::Null)
            .await
            .map(drop)
    }

    async fn attempt(&self, spec: &CommandSpec, body: &Value) -> Result<Value, ClientError> {
        let credential = self.authorized_credential(spec).await?;
        self.log_state(spec, CallState::Preauthorized);

        let expected_version = BuiltInCommand::from_name(spec.name())
            .is_none()
            .then(|| self.identity.version().to_owned());
        let envelope = Envelope::request(Some(credential), expected_version, body);
        let bytes = self.codec.encode(&envelope)?;

        let channel = self.connector.connect().await.map_err(|error| {
            self.connector.invalidate();
            ClientError::from(error)
        })?;
        self.log_state(spec, CallState::Connected);

        if !spec.response().expects_reply() {
            channel.notify(spec.name(), bytes).await?;
            self.log_state(spec, CallState::Succeeded);
            return Ok(Value::Null);
        }

        self.log_state(spec, CallState::AwaitingReply);
        let outcome = tokio::time::timeout(self.options.reply_timeout, channel.request(spec.name(), bytes))
            .await
            .map_err(|_| ClientError::TimedOut)?
            .map_err(|error| {
                self.connector.invalidate();
                ClientError::from(error)
            })?;

        match outcome {
            ReplyOutcome::Ok { envelope } => {
                let reply = self.codec.decode_raw(&envelope)?;
                self.log_state(spec, CallState::Succeeded);
                Ok(reply.body)
            }
            ReplyOutcome::Error { error } => {
                debug!(target: DISPATCH_TARGET, command = spec.name(), %error, "helper refused");
                Err(ClientError::from(error))
            }
        }
    }

    /// Pre-authorizes the token for `spec` and returns its portable form.
    ///
    /// The token lock is held only for this step.
    async fn authorized_credential(&self, spec: &CommandSpec) -> Result<Vec<u8>, ClientError> {
        let mut slot = self.token.lock().await;
        match self.preauthorized_form(&mut slot, spec).await {
            Err(error) if error.is_invalid_token() => {
                warn!(target: DISPATCH_TARGET, %error, "token invalidated; recreating");
                if let Some(stale) = slot.take() {
                    self.authority.release(&stale);
                }
                self.preauthorized_form(&mut slot, spec).await
            }
            other => other,
        }
    }

    async fn preauthorized_form(
        &self,
        slot: &mut Option<Token>,
        spec: &CommandSpec,
    ) -> Result<Vec<u8>, ClientError> {
        let token = self.ensure_token(slot)?;
        self.gate.preauthorize(&token, spec).await?;
        Ok(self.authority.external_form(&token)?)
    }

    fn ensure_token(&self, slot: &mut Option<Token>) -> Result<Token, ClientError> {
        if let Some(token) = slot {
            return Ok(*token);
        }
        let token = self.authority.create_token().map_err(ClientError::Authority)?;
        debug!(target: DISPATCH_TARGET, %token, "token created");
        *slot = Some(token);
        Ok(token)
    }

    async fn extend_interactively(&self, right: &str) -> Result<(), ClientError> {
        let mut slot = self.token.lock().await;
        let token = self.ensure_token(&mut slot)?;
        match self
            .authority
            .extend_rights(&token, right, Interaction::Allowed)
            .await
        {
            Err(error) if error.is_invalid_token() => {
                slot.take();
                let fresh = self.ensure_token(&mut slot)?;
                Ok(self
                    .authority
                    .extend_rights(&fresh, right, Interaction::Allowed)
                    .await?)
            }
            other => Ok(other?),
        }
    }

    async fn release_token(&self) {
        if let Some(token) = self.token.lock().await.take() {
            self.authority.release(&token);
            debug!(target: DISPATCH_TARGET, %token, "token released");
        }
    }

    fn log_state(&self, spec: &CommandSpec, state: CallState) {
        debug!(
            target: DISPATCH_TARGET,
            command = spec.name(),
            helper = self.identity.helper_id(),
            ?state,
            "call state"
        );
    }
}

impl Drop for ClientDispatcher {
    fn drop(&mut self) {
        if let Some(token) = self.token.get_mut().take() {
            self.authority.release(&token);
        }
    }
}
