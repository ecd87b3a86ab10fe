//! Peer identity and trust requirements.
//!
//! A requirement is a conjunction of clauses over the connecting process's
//! credentials:
//!
//! ```text
//! uid == 0 and executable == "/usr/local/bin/warden"
//! ```
//!
//! Supported clauses are `anyone`, `uid == N`, `gid == N` and
//! `executable == "PATH"`. Parsing failures and unknown peer fields fail
//! closed.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::IDENTITY_TARGET;

/// Credentials of the process on the other end of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerIdentity {
    pid: Option<i32>,
    uid: Option<u32>,
    gid: Option<u32>,
    executable: Option<PathBuf>,
}

impl PeerIdentity {
    /// Identity with no known credentials, as seen over TCP.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Identity from Unix peer credentials.
    #[must_use]
    pub const fn from_credentials(pid: Option<i32>, uid: u32, gid: u32) -> Self {
        Self {
            pid,
            uid: Some(uid),
            gid: Some(gid),
            executable: None,
        }
    }

    /// Attaches the peer's executable path.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Process identifier.
    #[must_use]
    pub const fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Effective user id.
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Effective group id.
    #[must_use]
    pub const fn gid(&self) -> Option<u32> {
        self.gid
    }

    /// Executable path.
    #[must_use]
    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.pid, self.uid) {
            (Some(pid), Some(uid)) => write!(formatter, "pid {pid} (uid {uid})"),
            (None, Some(uid)) => write!(formatter, "uid {uid}"),
            _ => formatter.write_str("unidentified peer"),
        }
    }
}

/// Decides whether a peer satisfies a trust requirement.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns `true` when `peer` satisfies `requirement`.
    async fn verify(&self, peer: &PeerIdentity, requirement: &str) -> bool;
}

/// A single requirement clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Matches every peer.
    Anyone,
    /// Matches a user id.
    Uid(u32),
    /// Matches a group id.
    Gid(u32),
    /// Matches an executable path.
    Executable(PathBuf),
}

impl Clause {
    fn matches(&self, peer: &PeerIdentity) -> bool {
        match self {
            Self::Anyone => true,
            Self::Uid(uid) => peer.uid == Some(*uid),
            Self::Gid(gid) => peer.gid == Some(*gid),
            Self::Executable(path) => peer.executable() == Some(path.as_path()),
        }
    }
}

/// Parsed trust requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    clauses: Vec<Clause>,
}

/// Errors raised while parsing a [`Requirement`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementParseError {
    /// The requirement text was blank.
    #[error("requirement is empty")]
    Empty,
    /// A clause did not follow the grammar.
    #[error("unrecognised requirement clause '{0}'")]
    Clause(String),
}

impl Requirement {
    /// Parses requirement text.
    ///
    /// # Errors
    ///
    /// Fails on blank input or any clause outside the grammar.
    pub fn parse(text: &str) -> Result<Self, RequirementParseError> {
        if text.trim().is_empty() {
            return Err(RequirementParseError::Empty);
        }
        let clauses = text
            .split(" and ")
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    /// Returns `true` when every clause matches.
    #[must_use]
    pub fn matches(&self, peer: &PeerIdentity) -> bool {
        self.clauses.iter().all(|clause| clause.matches(peer))
    }

    /// Parsed clauses.
    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }
}

fn parse_clause(raw: &str) -> Result<Clause, RequirementParseError> {
    let clause = raw.trim();
    if clause == "anyone" {
        return Ok(Clause::Anyone);
    }
    let invalid = || RequirementParseError::Clause(clause.to_owned());
    let (field, value) = clause.split_once("==").ok_or_else(invalid)?;
    let value = value.trim();
    match field.trim() {
        "uid" => value.parse().map(Clause::Uid).map_err(|_| invalid()),
        "gid" => value.parse().map(Clause::Gid).map_err(|_| invalid()),
        "executable" => value
            .strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .filter(|path| !path.is_empty())
            .map(|path| Clause::Executable(PathBuf::from(path)))
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Verifier evaluating the requirement grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequirementVerifier;

#[async_trait]
impl IdentityVerifier for RequirementVerifier {
    async fn verify(&self, peer: &PeerIdentity, requirement: &str) -> bool {
        match Requirement::parse(requirement) {
            Ok(parsed) => parsed.matches(peer),
            Err(error) => {
                warn!(
                    target: IDENTITY_TARGET,
                    requirement,
                    %error,
                    "rejecting peer: requirement does not parse"
                );
                false
            }
        }
    }
}
