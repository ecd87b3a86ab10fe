//! Command specifications and their typed request/response contracts.

use std::any::{self, TypeId};
use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an authority policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rule(Cow<'static, str>);

impl Rule {
    /// Always granted without interaction.
    pub const ALLOW: Self = Self(Cow::Borrowed("allow"));
    /// Never granted.
    pub const DENY: Self = Self(Cow::Borrowed("deny"));
    /// Granted after an administrator authenticates.
    pub const AUTHENTICATE_ADMIN: Self = Self(Cow::Borrowed("authenticate-admin"));
    /// Granted after the session owner authenticates.
    pub const AUTHENTICATE_SESSION_OWNER: Self =
        Self(Cow::Borrowed("authenticate-session-owner"));

    /// Builds a rule from an arbitrary identifier.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Rule identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when granting the rule needs user interaction.
    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        self.as_str().starts_with("authenticate")
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// The declared type of a request or response payload.
///
/// `()` stands for "no value".
#[derive(Debug, Clone, Copy, Eq)]
pub enum ValueType {
    /// No payload.
    Nothing,
    /// A concrete Rust type.
    Typed {
        /// Runtime identity of the type.
        id: TypeId,
        /// Type name used in diagnostics only.
        name: &'static str,
    },
}

impl ValueType {
    /// Contract for the Rust type `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        let id = TypeId::of::<T>();
        if id == TypeId::of::<()>() {
            Self::Nothing
        } else {
            Self::Typed {
                id,
                name: any::type_name::<T>(),
            }
        }
    }

    /// Human-readable name of the type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nothing => "()",
            Self::Typed { name, .. } => name,
        }
    }
}

impl PartialEq for ValueType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nothing, Self::Nothing) => true,
            (Self::Typed { id: left, .. }, Self::Typed { id: right, .. }) => left == right,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Whether the client waits for a reply, and of which type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseContract {
    /// Exactly one reply of the given type.
    Wait(ValueType),
    /// Fire and forget; no reply is sent.
    NoWait,
}

impl ResponseContract {
    /// Returns `true` when a reply is expected.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        matches!(self, Self::Wait(_))
    }
}

impl fmt::Display for ResponseContract {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait(value) => write!(formatter, "wait({value})"),
            Self::NoWait => formatter.write_str("no-wait"),
        }
    }
}

/// A named privileged command.
///
/// Specs are built once at startup and never change afterwards.
///
/// ```
/// use warden_protocol::{CommandSpec, Rule};
///
/// let spec = CommandSpec::new("say-hello", Rule::ALLOW)
///     .with_request::<String>()
///     .with_response::<String>();
/// assert_eq!(spec.name(), "say-hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    name: Cow<'static, str>,
    rule: Rule,
    prompt: Option<String>,
    request: ValueType,
    response: ResponseContract,
    code_signing_requirement: Option<String>,
}

impl CommandSpec {
    /// Starts a spec carrying no request and waiting for an empty reply.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, rule: Rule) -> Self {
        Self {
            name: name.into(),
            rule,
            prompt: None,
            request: ValueType::Nothing,
            response: ResponseContract::Wait(ValueType::Nothing),
            code_signing_requirement: None,
        }
    }

    /// Declares the request payload type.
    #[must_use]
    pub fn with_request<T: 'static>(mut self) -> Self {
        self.request = ValueType::of::<T>();
        self
    }

    /// Declares the reply payload type.
    #[must_use]
    pub fn with_response<T: 'static>(mut self) -> Self {
        self.response = ResponseContract::Wait(ValueType::of::<T>());
        self
    }

    /// Marks the command as fire and forget.
    #[must_use]
    pub const fn without_reply(mut self) -> Self {
        self.response = ResponseContract::NoWait;
        self
    }

    /// Text shown when the user is asked to consent.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Requirement the calling client must satisfy.
    #[must_use]
    pub fn with_code_signing_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.code_signing_requirement = Some(requirement.into());
        self
    }

    /// Unique command name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Authority rule gating the command.
    #[must_use]
    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Consent prompt.
    #[must_use]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Declared request type.
    #[must_use]
    pub const fn request(&self) -> ValueType {
        self.request
    }

    /// Declared response contract.
    #[must_use]
    pub const fn response(&self) -> ResponseContract {
        self.response
    }

    /// Requirement the calling client must satisfy.
    #[must_use]
    pub fn code_signing_requirement(&self) -> Option<&str> {
        self.code_signing_requirement.as_deref()
    }
}
