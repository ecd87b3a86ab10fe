//! Catalogue of built-in and custom commands.
//!
//! Every registry carries the two built-in commands. Custom commands are
//! supplied once at construction; names are unique across both groups.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::authority::RightDefinition;
use crate::command::{CommandSpec, ResponseContract, Rule, ValueType};

/// Name of the version probe built-in.
pub const GET_VERSION: &str = "getVersion";
/// Name of the uninstall built-in.
pub const UNINSTALL_HELPER_TOOL: &str = "uninstallHelperTool";

static GET_VERSION_SPEC: Lazy<CommandSpec> =
    Lazy::new(|| CommandSpec::new(GET_VERSION, Rule::ALLOW).with_response::<String>());

static UNINSTALL_SPEC: Lazy<CommandSpec> =
    Lazy::new(|| CommandSpec::new(UNINSTALL_HELPER_TOOL, Rule::ALLOW));

/// Commands every helper understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltInCommand {
    /// Reports the running helper's version.
    GetVersion,
    /// Removes the helper's installed artefacts.
    UninstallHelperTool,
}

impl BuiltInCommand {
    /// Both built-ins in catalogue order.
    pub const ALL: [Self; 2] = [Self::GetVersion, Self::UninstallHelperTool];

    /// Spec describing the built-in.
    #[must_use]
    pub fn spec(self) -> &'static CommandSpec {
        match self {
            Self::GetVersion => &GET_VERSION_SPEC,
            Self::UninstallHelperTool => &UNINSTALL_SPEC,
        }
    }

    /// Wire name of the built-in.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GetVersion => GET_VERSION,
            Self::UninstallHelperTool => UNINSTALL_HELPER_TOOL,
        }
    }

    /// Resolves a name to a built-in.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.name() == name)
    }
}

/// Result of looking a command up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedCommand<'a> {
    /// One of the built-ins.
    BuiltIn(BuiltInCommand),
    /// A command supplied by the application.
    Custom(&'a CommandSpec),
}

impl<'a> ResolvedCommand<'a> {
    /// Spec for the resolved command.
    #[must_use]
    pub fn spec(self) -> &'a CommandSpec {
        match self {
            Self::BuiltIn(command) => command.spec(),
            Self::Custom(spec) => spec,
        }
    }
}

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A custom command reused a built-in name.
    #[error("command '{name}' collides with a built-in command")]
    BuiltInCollision {
        /// The colliding name.
        name: String,
    },
    /// Two custom commands share a name.
    #[error("command '{name}' is already registered")]
    Duplicate {
        /// The duplicated name.
        name: String,
    },
    /// A command name was empty.
    #[error("command names must not be empty")]
    InvalidName,
}

/// A declared type did not match the type used at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// The request type differs from the declaration.
    #[error("command '{command}' expects a {expected} request but was given {actual}")]
    Request {
        /// Command name.
        command: String,
        /// Declared request type.
        expected: ValueType,
        /// Type supplied by the caller.
        actual: ValueType,
    },
    /// The response type differs from the declaration.
    #[error("command '{command}' replies with {expected} but the caller expects {actual}")]
    Response {
        /// Command name.
        command: String,
        /// Declared response contract.
        expected: ResponseContract,
        /// Type the caller wants back.
        actual: ValueType,
    },
}

/// Checks a request/response type pair against a spec.
///
/// A `NoWait` command only accepts `()` as the response type.
///
/// # Errors
///
/// Returns the first mismatching side.
pub fn validate(
    spec: &CommandSpec,
    request: ValueType,
    response: ValueType,
) -> Result<(), ContractViolation> {
    if spec.request() != request {
        return Err(ContractViolation::Request {
            command: spec.name().to_owned(),
            expected: spec.request(),
            actual: request,
        });
    }
    let declared = match spec.response() {
        ResponseContract::Wait(declared) => declared,
        ResponseContract::NoWait => ValueType::Nothing,
    };
    if declared != response {
        return Err(ContractViolation::Response {
            command: spec.name().to_owned(),
            expected: spec.response(),
            actual: response,
        });
    }
    Ok(())
}

/// Typed form of [`validate`].
///
/// # Errors
///
/// Returns the first mismatching side.
pub fn validate_types<Req: 'static, Resp: 'static>(
    spec: &CommandSpec,
) -> Result<(), ContractViolation> {
    validate(spec, ValueType::of::<Req>(), ValueType::of::<Resp>())
}

/// Immutable command catalogue.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    custom: Vec<CommandSpec>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    /// Builds a registry from the application's commands.
    ///
    /// # Errors
    ///
    /// Fails when a name is empty, duplicated or taken by a built-in.
    pub fn new(custom: Vec<CommandSpec>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(custom.len());
        for (position, spec) in custom.iter().enumerate() {
            let name = spec.name();
            if name.trim().is_empty() {
                return Err(RegistryError::InvalidName);
            }
            if BuiltInCommand::from_name(name).is_some() {
                return Err(RegistryError::BuiltInCollision {
                    name: name.to_owned(),
                });
            }
            if index.insert(name.to_owned(), position).is_some() {
                return Err(RegistryError::Duplicate {
                    name: name.to_owned(),
                });
            }
        }
        Ok(Self { custom, index })
    }

    /// Resolves a command by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ResolvedCommand<'_>> {
        if let Some(command) = BuiltInCommand::from_name(name) {
            return Some(ResolvedCommand::BuiltIn(command));
        }
        self.index
            .get(name)
            .and_then(|position| self.custom.get(*position))
            .map(ResolvedCommand::Custom)
    }

    /// Returns `true` when `spec` belongs to this registry.
    #[must_use]
    pub fn contains(&self, spec: &CommandSpec) -> bool {
        self.lookup(spec.name())
            .is_some_and(|resolved| resolved.spec() == spec)
    }

    /// All commands, built-ins first, then custom commands in declaration
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        let built_ins: [&CommandSpec; 2] = BuiltInCommand::ALL.map(BuiltInCommand::spec);
        built_ins.into_iter().chain(self.custom.iter())
    }

    /// Right definitions for every command.
    pub fn rights(&self) -> impl Iterator<Item = RightDefinition> + '_ {
        self.iter().map(RightDefinition::for_command)
    }

    /// Number of custom commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.custom.len()
    }

    /// Returns `true` when no custom commands are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty()
    }
}

#[cfg(test)]
mod tests;
