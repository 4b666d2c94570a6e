use std::fmt;

use crate::error::{Failure, UpdaterError};
use crate::release::ReleaseInfo;
use crate::version::{Version, is_newer_version};

/// The authoritative update status. Exactly one variant is active; the
/// transition methods below are the only way to move between them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UpdateState {
    #[default]
    Idle,
    Checking,
    UpToDate,
    UpdateAvailable(ReleaseInfo),
    CheckFailed(Failure),
    Installing(ReleaseInfo),
    /// Displays like `UpdateAvailable` with the install error surfaced.
    InstallFailed {
        release: ReleaseInfo,
        failure: Failure,
    },
    Restarting(ReleaseInfo),
}

/// Payload-free name of a state, used in logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateName {
    Idle,
    Checking,
    UpToDate,
    UpdateAvailable,
    CheckFailed,
    Installing,
    InstallFailed,
    Restarting,
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Checking => "checking for updates",
            Self::UpToDate => "up to date",
            Self::UpdateAvailable => "an update is available",
            Self::CheckFailed => "the last check failed",
            Self::Installing => "installing",
            Self::InstallFailed => "the last install failed",
            Self::Restarting => "restarting",
        })
    }
}

impl UpdateState {
    #[must_use]
    pub fn name(&self) -> StateName {
        match self {
            Self::Idle => StateName::Idle,
            Self::Checking => StateName::Checking,
            Self::UpToDate => StateName::UpToDate,
            Self::UpdateAvailable(_) => StateName::UpdateAvailable,
            Self::CheckFailed(_) => StateName::CheckFailed,
            Self::Installing(_) => StateName::Installing,
            Self::InstallFailed { .. } => StateName::InstallFailed,
            Self::Restarting(_) => StateName::Restarting,
        }
    }

    /// The release an install may be started for.
    #[must_use]
    pub fn pending_release(&self) -> Option<&ReleaseInfo> {
        match self {
            Self::UpdateAvailable(release) | Self::InstallFailed { release, .. } => Some(release),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.pending_release().is_some()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::CheckFailed(failure) | Self::InstallFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// An operation is outstanding and must finish before another may start.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Checking | Self::Installing(_) | Self::Restarting(_))
    }

    /// `Checking` if a check may start from here. A check never interrupts an
    /// in-flight check or install.
    #[must_use]
    pub fn begin_check(&self) -> Option<Self> {
        (!self.is_busy()).then_some(Self::Checking)
    }

    /// Resolve a finished check. Only meaningful while `Checking`.
    #[must_use]
    pub fn finish_check(
        &self,
        outcome: Result<ReleaseInfo, Failure>,
        running: &Version,
    ) -> Option<Self> {
        if !matches!(self, Self::Checking) {
            return None;
        }
        Some(match outcome {
            Ok(release) if is_newer_version(&release.version, running) => {
                Self::UpdateAvailable(release)
            }
            Ok(_) => Self::UpToDate,
            Err(failure) => Self::CheckFailed(failure),
        })
    }

    /// `Installing` for the pending release.
    ///
    /// # Errors
    /// Returns `InvalidState` unless an update is pending.
    pub fn begin_install(&self) -> Result<Self, UpdaterError> {
        self.pending_release()
            .map(|release| Self::Installing(release.clone()))
            .ok_or(UpdaterError::InvalidState {
                operation: "install update",
                state: self.name(),
            })
    }

    /// Resolve a finished install. Only meaningful while `Installing`.
    #[must_use]
    pub fn finish_install(&self, outcome: Result<(), Failure>) -> Option<Self> {
        let Self::Installing(release) = self else {
            return None;
        };
        Some(match outcome {
            Ok(()) => Self::Restarting(release.clone()),
            Err(failure) => Self::InstallFailed {
                release: release.clone(),
                failure,
            },
        })
    }

    /// Back to `Idle`.
    ///
    /// # Errors
    /// Returns `InvalidState` while an operation is outstanding.
    pub fn clear(&self) -> Result<Self, UpdaterError> {
        if self.is_busy() {
            return Err(UpdaterError::InvalidState {
                operation: "clear update state",
                state: self.name(),
            });
        }
        Ok(Self::Idle)
    }
}
