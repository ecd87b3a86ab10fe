//! Structured health reporting for helper lifecycle events.

use std::sync::Arc;

use warden_config::{Config, ServiceDescriptor, SocketEndpoint};

use crate::HEALTH_TARGET;
use crate::bootstrap::BootstrapError;

/// Observer for lifecycle events.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked once configuration, telemetry and the descriptor are ready.
    fn bootstrap_succeeded(&self, config: &Config, descriptor: &ServiceDescriptor);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when the listener accepts connections.
    fn listener_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked when the helper starts shutting down.
    fn shutdown_started(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config, descriptor: &ServiceDescriptor) {
        (**self).bootstrap_succeeded(config, descriptor);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        (**self).listener_ready(endpoint);
    }

    fn shutdown_started(&self) {
        (**self).shutdown_started();
    }
}

/// Reporter that records lifecycle events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting helper bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config, descriptor: &ServiceDescriptor) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            helper = %descriptor.helper_id,
            version = descriptor.version.as_deref().unwrap_or("unversioned"),
            socket = %descriptor.socket,
            installer = %config.installer(),
            cleanup = %config.uninstall_cleanup(),
            "helper bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "helper bootstrap failed"
        );
    }

    fn listener_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            endpoint = %endpoint,
            "helper is accepting connections"
        );
    }

    fn shutdown_started(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            "helper shutting down"
        );
    }
}
