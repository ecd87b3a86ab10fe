//! Client side of the privileged helper protocol.
//!
//! [`ClientDispatcher`] sends typed commands to the helper over a
//! [`SocketConnector`], repairing a missing or stale helper through an
//! [`warden_protocol::Installer`] before retrying once.

mod cli;
mod dispatcher;
mod error;
mod installer;
mod transport;

pub use dispatcher::{
    CallOptions, ClientDispatcher, DEFAULT_REPLY_TIMEOUT, INSTALL_RIGHT, MODIFY_RIGHT,
};
pub use cli::run;
pub use error::ClientError;
pub use installer::{
    HelperLauncher, LegacyInstaller, ManagedInstaller, ProcessLauncher, installer_for,
};
pub use transport::{CONNECTION_TIMEOUT, SocketChannel, SocketConnector};

/// Tracing target for dispatch events.
pub const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
/// Tracing target for transport events.
pub const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
/// Tracing target for installer events.
pub const INSTALLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::installer");
