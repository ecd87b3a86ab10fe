//! The service descriptor published alongside an installed helper.
//!
//! The descriptor records what the helper reports about itself: the version
//! answered by `getVersion`, the program to launch, the socket to serve and an
//! optional requirement every connecting client must satisfy.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SocketEndpoint;

/// Metadata describing an installed helper.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceDescriptor {
    /// Helper identifier.
    pub helper_id: String,
    /// Version string, absent when the descriptor was written without one.
    #[serde(default)]
    pub version: Option<String>,
    /// Path of the helper program.
    pub program: Utf8PathBuf,
    /// Socket the helper listens on.
    pub socket: SocketEndpoint,
    /// Requirement clients must satisfy to connect at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_clients: Option<String>,
}

impl ServiceDescriptor {
    /// Reads a descriptor from disk.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid descriptor.
    pub fn load(path: &Utf8Path) -> Result<Self, DescriptorError> {
        let text = fs::read_to_string(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| DescriptorError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes the descriptor, creating parent directories as needed.
    ///
    /// The file is written beside its destination and renamed into place.
    ///
    /// # Errors
    ///
    /// Fails when serialisation or any filesystem step fails.
    pub fn store(&self, path: &Utf8Path) -> Result<(), DescriptorError> {
        let write_error = |source| DescriptorError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| DescriptorError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, text).map_err(write_error)?;
        fs::rename(&staging, path).map_err(write_error)
    }

    /// Removes a descriptor file, reporting whether anything was deleted.
    ///
    /// # Errors
    ///
    /// Fails for any removal error other than the file being absent.
    pub fn remove(path: &Utf8Path) -> Result<bool, DescriptorError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DescriptorError::Write {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Errors raised while reading or writing a [`ServiceDescriptor`].
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The descriptor could not be read.
    #[error("failed to read service descriptor '{path}': {source}")]
    Read {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The descriptor could not be written or removed.
    #[error("failed to write service descriptor '{path}': {source}")]
    Write {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The descriptor contents were not valid JSON.
    #[error("invalid service descriptor '{path}': {source}")]
    Parse {
        /// Descriptor path.
        path: Utf8PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl DescriptorError {
    /// Returns `true` when the descriptor file does not exist.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir")
    }

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            helper_id: "dev.example.helper".to_owned(),
            version: Some("2".to_owned()),
            program: Utf8PathBuf::from("/opt/helpers/dev.example.helper"),
            socket: SocketEndpoint::tcp("127.0.0.1", 4100),
            authorized_clients: Some("uid == 501".to_owned()),
        }
    }

    #[test]
    fn store_then_load_preserves_fields() {
        let dir = TempDir::new().expect("temp dir");
        let path = utf8_root(&dir).join("services/dev.example.helper.json");

        descriptor().store(&path).expect("descriptor stored");
        let loaded = ServiceDescriptor::load(&path).expect("descriptor loads");

        assert_eq!(loaded, descriptor());
    }

    #[test]
    fn version_is_optional_on_disk() {
        let dir = TempDir::new().expect("temp dir");
        let path = utf8_root(&dir).join("bare.json");
        fs::write(
            &path,
            r#"{"helper_id":"h","program":"/p","socket":{"transport":"tcp","host":"::1","port":1}}"#,
        )
        .expect("write descriptor");

        let loaded = ServiceDescriptor::load(&path).expect("descriptor loads");

        assert_eq!(loaded.version, None);
        assert_eq!(loaded.authorized_clients, None);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let path = utf8_root(&dir).join("gone.json");
        descriptor().store(&path).expect("descriptor stored");

        assert!(ServiceDescriptor::remove(&path).expect("first removal"));
        assert!(!ServiceDescriptor::remove(&path).expect("second removal"));
    }

    #[test]
    fn missing_descriptor_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let error = ServiceDescriptor::load(&utf8_root(&dir).join("absent.json"))
            .expect_err("load should fail");
        assert!(error.is_missing());
    }
}
