//! Enumerated settings: installer selection, uninstall cleanup and log format.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Who owns the helper's installed artefacts.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum InstallerMode {
    /// The client copies the helper into place and the helper removes itself
    /// on uninstall.
    #[default]
    Legacy,
    /// The OS service manager registers and unregisters the helper.
    Managed,
}

/// How the uninstall built-in reacts when an artefact cannot be removed.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CleanupPolicy {
    /// Any removal failure other than "not found" fails the uninstall.
    #[default]
    Strict,
    /// Removal failures are logged and the uninstall still succeeds.
    BestEffort,
}

/// Shape of the helper's log lines.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// JSON objects, one per line, for the service manager's journal.
    #[default]
    Json,
    /// Terse text for interactive runs.
    Compact,
}

/// Error returned when any of these settings fails to parse.
pub type PolicyParseError = strum::ParseError;
