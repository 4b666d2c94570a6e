use std::fmt;

use thiserror::Error;

use crate::state::StateName;

/// Coarse classification of every failure the updater can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Network,
    NotFound,
    Verification,
    /// Applying a verified artifact to disk failed.
    Install,
    InvalidState,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Network => "network",
            Self::NotFound => "not found",
            Self::Verification => "verification",
            Self::Install => "install",
            Self::InvalidState => "invalid state",
        }
    }

    /// Short user-facing summary suitable for a dialog title.
    #[must_use]
    pub fn summary(self) -> &'static str {
        match self {
            Self::Parse => "The update information could not be read.",
            Self::Network => "Could not reach the update server.",
            Self::NotFound => "No release is published for this channel.",
            Self::Verification => "The downloaded update could not be verified.",
            Self::Install => "The update could not be installed.",
            Self::InvalidState => "The updater is busy.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure absorbed into the update state. Cheap to clone so it can live
/// inside state snapshots handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Errors returned synchronously by updater operations. Operational failures
/// never appear here; they become state transitions instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdaterError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: StateName,
    },
    #[error("updater service has stopped")]
    Stopped,
}

impl UpdaterError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidState
    }
}
