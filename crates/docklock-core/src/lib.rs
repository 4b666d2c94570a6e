//! Update core for DockLock.
//!
//! This crate contains everything needed to keep the menu-bar app current and
//! nothing that draws UI:
//! - Version parsing and ordering.
//! - Release discovery on GitHub, keyed by channel.
//! - The update state machine and the service that drives it.
//! - Download, verification and installation of release artifacts.
//! - A background check scheduler.

mod error;
mod install;
mod release;
mod retry;
mod schedule;
mod state;
mod updater;
mod verify;
mod version;

/// Error taxonomy shared by every stage of an update.
pub use error::{ErrorKind, Failure, UpdaterError};
/// Artifact installation seam and the default bundle installer.
pub use install::{
    BundleInstaller, InstallError, InstallExecutor, InstallOutcome, InstallProgress,
    InstallTarget, InstallerConfig, cleanup_previous_install, restart_app,
};
/// Release metadata model and the GitHub-backed source.
pub use release::{
    ChannelId, ChannelSource, GitHubReleaseSource, GitHubSourceConfig, IntegrityRef, ReleaseError,
    ReleaseInfo, ReleaseSource,
};
/// Periodic silent checks.
pub use schedule::{CheckSchedule, spawn_background_checks};
/// Update state machine.
pub use state::{StateName, UpdateState};
/// The update service and its handle.
pub use updater::{SubscriptionId, UpdateEvent, Updater, UpdaterConfig, UpdaterHandle};
/// External verification seam and the SHA-256 verifier.
pub use verify::{ArtifactVerifier, Sha256Verifier, VerificationError};
/// Version parsing and comparison.
pub use version::{Version, VersionParseError, compare, compare_str, is_newer_version};
