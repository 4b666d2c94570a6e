use std::path::PathBuf;
use thiserror::Error;

const APP_DIR_NAME: &str = "DockLock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine the application support directory")]
    SupportDirUnavailable,
    #[error("Could not determine the cache directory")]
    CacheDirUnavailable,
}

/// Where DockLock keeps its files. Settings and the log live in the support
/// directory; update downloads go to the cache so the system may purge them.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub support_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl AppPaths {
    /// # Errors
    /// Returns an error when the user's support or cache directory is unknown.
    pub fn new() -> Result<Self, AppPathsError> {
        let support = dirs::config_dir().ok_or(AppPathsError::SupportDirUnavailable)?;
        let cache = dirs::cache_dir().ok_or(AppPathsError::CacheDirUnavailable)?;
        Ok(Self {
            support_dir: support.join(APP_DIR_NAME),
            cache_dir: cache.join(APP_DIR_NAME),
        })
    }

    /// Paths rooted under a single directory, used for portable installs and
    /// tests.
    #[must_use]
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            support_dir: root.join("support"),
            cache_dir: root.join("cache"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.support_dir.join("settings.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.support_dir.join("docklock.log")
    }

    /// Each install attempt gets its own temp dir below this one.
    #[must_use]
    pub fn updates_dir(&self) -> PathBuf {
        self.cache_dir.join("updates")
    }

    /// # Errors
    /// Returns an error if either directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.support_dir)?;
        std::fs::create_dir_all(&self.cache_dir)
    }
}
