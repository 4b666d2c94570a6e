use docklock_core::{ChannelId, Failure, InstallError, ReleaseError, UpdaterError};
use docklock_platform::AppPathsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Failed to locate app directories: {0}")]
    Paths(#[from] AppPathsError),
    #[error("Failed to set up {component}: {details}")]
    Setup {
        component: &'static str,
        details: String,
    },
    #[error("Channel '{channel}' is not configured")]
    UnknownChannel { channel: ChannelId },
    #[error(transparent)]
    Updater(#[from] UpdaterError),
    #[error("{operation} failed: {failure}")]
    Update {
        operation: &'static str,
        failure: Failure,
    },
    #[error("Failed to open {url}: {details}")]
    OpenUrl { url: String, details: String },
    #[error("App update {phase} failed: {details}")]
    AutoUpdateFailed {
        phase: &'static str,
        details: String,
    },
}

impl AppError {
    pub fn setup(component: &'static str, details: impl ToString) -> Self {
        Self::Setup {
            component,
            details: details.to_string(),
        }
    }

    pub fn update(operation: &'static str, failure: Failure) -> Self {
        Self::Update { operation, failure }
    }

    pub fn auto_update_failed(phase: &'static str, details: impl ToString) -> Self {
        Self::AutoUpdateFailed {
            phase,
            details: details.to_string(),
        }
    }
}

impl From<ReleaseError> for AppError {
    fn from(error: ReleaseError) -> Self {
        Self::setup("release source", error)
    }
}

impl From<InstallError> for AppError {
    fn from(error: InstallError) -> Self {
        Self::setup("installer", error)
    }
}
