//! Privileged command execution protocol.
//!
//! A client asks a separately installed helper to run named commands. Each
//! command is declared once as a [`CommandSpec`] in a [`CommandRegistry`]
//! together with its typed contract and the authority rule guarding it.
//! Requests travel as [`Envelope`]s carrying a portable credential and the
//! helper version the client expects; the helper verifies the caller's
//! identity and the credential's rights through the [`ServerGate`] before any
//! handler runs.
//!
//! The collaborators at the edges are traits: [`CredentialAuthority`],
//! [`IdentityVerifier`], [`Installer`] and [`Connector`]. Concrete
//! implementations of the first two live here; the transport and installers
//! live in `warden-client` and `wardend`.

mod authority;
mod channel;
mod command;
pub mod demo;
mod envelope;
mod error;
pub mod frame;
mod gate;
mod identity;
mod installer;
mod registry;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use authority::{
    AuthorityError, AuthorityKeyError, AutoApprovePrompt, ConsentPrompt, CredentialAuthority,
    Interaction, NonInteractivePrompt, RightDefinition, SealedTokenAuthority, Token,
};
pub use channel::{Channel, ChannelError, Connector, is_peer_gone};
pub use command::{CommandSpec, ResponseContract, Rule, ValueType};
pub use envelope::{Envelope, EnvelopeCodec, EnvelopeError, decode_body, encode_body};
pub use error::{DenialReason, RemoteError};
pub use frame::{
    FrameError, MAX_FRAME_BYTES, ReplyFrame, ReplyOutcome, RequestFrame, ServerFrame,
    ServerNotice,
};
pub use gate::{AuthorizationError, ClientGate, ServerGate};
pub use identity::{
    Clause, IdentityVerifier, PeerIdentity, Requirement, RequirementParseError,
    RequirementVerifier,
};
pub use installer::{Installer, InstallerError, RegistrationStatus, ServiceIdentity};
pub use registry::{
    BuiltInCommand, CommandRegistry, ContractViolation, GET_VERSION, RegistryError,
    ResolvedCommand, UNINSTALL_HELPER_TOOL, validate, validate_types,
};

/// Tracing target for authority events.
pub const AUTHORITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::authority");
/// Tracing target for gate decisions.
pub const GATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::gate");
/// Tracing target for identity checks.
pub const IDENTITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::identity");
