//! The privileged helper serving warden commands.
//!
//! `wardend` is launched by an installer with the path of its service
//! descriptor. Bootstrap loads the shared configuration, installs structured
//! telemetry and reads the descriptor; the [`SocketListener`] then accepts
//! connections and hands every request frame to the [`HelperService`].
//!
//! The service checks each request in a fixed order: the command must be
//! registered, the client's expected version must match the descriptor, and
//! the credential must grant the command's right to a caller whose identity
//! satisfies the command's requirement. Only then does the registered handler
//! run. The built-in `getVersion` and `uninstallHelperTool` commands are
//! answered by the service itself.

mod bootstrap;
mod health;
mod service;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Helper, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use service::{
    Dispatched, HandlerContext, HandlerError, HandlerRegistrationError, HelperService,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{DRAIN_TIMEOUT, ListenerError, SocketListener};

/// Tracing target for request dispatch.
pub const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
/// Tracing target for socket handling.
pub const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
/// Tracing target for lifecycle events.
pub const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");
