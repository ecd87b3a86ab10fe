//! Filesystem layout of an installed helper.

use camino::{Utf8Path, Utf8PathBuf};

use crate::{Config, SocketEndpoint};

/// Where an installed helper's artefacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    program: Utf8PathBuf,
    descriptor: Utf8PathBuf,
    socket: SocketEndpoint,
}

impl InstallLayout {
    /// Derives the layout from the shared configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.install_root,
            &config.descriptor_root,
            config.helper_id(),
            config.helper_socket().clone(),
        )
    }

    /// Builds a layout rooted at explicit directories.
    #[must_use]
    pub fn new(
        install_root: &Utf8Path,
        descriptor_root: &Utf8Path,
        helper_id: &str,
        socket: SocketEndpoint,
    ) -> Self {
        Self {
            program: install_root.join(helper_id),
            descriptor: descriptor_root.join(format!("{helper_id}.json")),
            socket,
        }
    }

    /// Installed helper program.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    /// Published service descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &Utf8Path {
        &self.descriptor
    }

    /// Socket the installed helper serves.
    #[must_use]
    pub const fn socket(&self) -> &SocketEndpoint {
        &self.socket
    }
}
