//! The demo command set served by `wardend` and driven by `warden`.

use crate::command::{CommandSpec, Rule};
use crate::registry::{CommandRegistry, RegistryError};

/// Name of the greeting command.
pub const SAY_HELLO: &str = "say-hello";
/// Name of the administrator-only command.
pub const ADMIN_ONLY: &str = "admin-only";

/// Echoes a greeting back with a `pong:` prefix.
#[must_use]
pub fn say_hello() -> CommandSpec {
    CommandSpec::new(SAY_HELLO, Rule::ALLOW)
        .with_request::<String>()
        .with_response::<String>()
        .with_prompt("Send a greeting to the privileged helper.")
}

/// Reports the helper's effective user, after administrator consent.
#[must_use]
pub fn admin_only() -> CommandSpec {
    CommandSpec::new(ADMIN_ONLY, Rule::AUTHENTICATE_ADMIN)
        .with_response::<String>()
        .with_prompt("Administrator approval is required to query the helper.")
}

/// Registry holding the demo commands.
///
/// # Errors
///
/// Never fails for the demo set; the signature mirrors [`CommandRegistry::new`].
pub fn registry() -> Result<CommandRegistry, RegistryError> {
    CommandRegistry::new(vec![say_hello(), admin_only()])
}
