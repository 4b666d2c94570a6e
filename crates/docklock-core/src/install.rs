use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::{ErrorKind, Failure};
use crate::release::ReleaseInfo;
use crate::verify::{ArtifactVerifier, VerificationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallProgress {
    Downloading { downloaded: u64, total: u64 },
    Verifying,
    Extracting,
    Applying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The running bundle was replaced; relaunch to run it.
    RestartRequired,
    /// An explicit install path was replaced; nothing to relaunch.
    Installed,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("download failed with HTTP {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{0}")]
    Invalid(String),
}

impl InstallError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }

    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http { .. } | Self::HttpStatus(_) => ErrorKind::Network,
            Self::Verification(_) => ErrorKind::Verification,
            Self::Io { .. } | Self::Zip { .. } | Self::Invalid(_) => ErrorKind::Install,
        }
    }
}

impl From<&InstallError> for Failure {
    fn from(error: &InstallError) -> Self {
        Failure::new(error.kind(), error.to_string())
    }
}

/// Downloads, verifies and applies one release. A successful call is not
/// reversible; the caller must not repeat it for the same release.
#[async_trait]
pub trait InstallExecutor: Send + Sync {
    async fn install(
        &self,
        release: &ReleaseInfo,
        progress: mpsc::Sender<InstallProgress>,
    ) -> Result<InstallOutcome, InstallError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    /// The `.app` bundle containing the running process.
    RunningApp,
    /// An explicit `.app` bundle path.
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Parent of the per-attempt temp directories.
    pub work_dir: PathBuf,
    pub target: InstallTarget,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl InstallerConfig {
    pub fn new(work_dir: impl Into<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            target: InstallTarget::RunningApp,
            timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            user_agent: user_agent.into(),
        }
    }
}

pub struct BundleInstaller {
    client: reqwest::Client,
    verifier: Arc<dyn ArtifactVerifier>,
    config: InstallerConfig,
}

impl BundleInstaller {
    /// # Errors
    /// Returns an error when the download client cannot be constructed.
    pub fn new(
        config: InstallerConfig,
        verifier: Arc<dyn ArtifactVerifier>,
    ) -> Result<Self, InstallError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|error| InstallError::http("failed to build download client", error))?;
        Ok(Self {
            client,
            verifier,
            config,
        })
    }

    fn apply(&self, extract_dir: &Path) -> Result<InstallOutcome, InstallError> {
        match &self.config.target {
            InstallTarget::Path(target) => {
                replace_path(extract_dir, target)?;
                Ok(InstallOutcome::Installed)
            }
            InstallTarget::RunningApp => {
                replace_path(extract_dir, &current_app_bundle()?)?;
                Ok(InstallOutcome::RestartRequired)
            }
        }
    }
}

#[async_trait]
impl InstallExecutor for BundleInstaller {
    async fn install(
        &self,
        release: &ReleaseInfo,
        progress: mpsc::Sender<InstallProgress>,
    ) -> Result<InstallOutcome, InstallError> {
        std::fs::create_dir_all(&self.config.work_dir)
            .map_err(|error| InstallError::io("failed to create update directory", error))?;
        let temp_dir = tempfile::tempdir_in(&self.config.work_dir)
            .map_err(|error| InstallError::io("failed to create temp directory", error))?;

        let file_name = safe_file_name(&release.asset_name);
        let download_path = temp_dir.path().join(file_name);

        info!("Downloading {} from {}", release.version, release.download_url);
        download_file(&self.client, &release.download_url, &download_path, &progress).await?;

        let _ = progress.send(InstallProgress::Verifying).await;
        self.verifier
            .verify(&download_path, &release.asset_name, release.integrity.as_ref())
            .await?;

        let _ = progress.send(InstallProgress::Extracting).await;
        let extract_dir = temp_dir.path().join("extracted");
        std::fs::create_dir_all(&extract_dir)
            .map_err(|error| InstallError::io("failed to create extraction directory", error))?;
        extract_zip(&download_path, &extract_dir)?;

        let _ = progress.send(InstallProgress::Applying).await;
        self.apply(&extract_dir)
    }
}

fn safe_file_name(asset_name: &str) -> &str {
    let raw_name = asset_name.rsplit(['/', '\\']).next().unwrap_or(asset_name);
    Path::new(raw_name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && !n.contains(".."))
        .unwrap_or("update-download")
}

async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: &mpsc::Sender<InstallProgress>,
) -> Result<(), InstallError> {
    use futures_util::StreamExt;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| InstallError::http("download request failed", error))?;

    if !response.status().is_success() {
        return Err(InstallError::HttpStatus(response.status()));
    }

    let total = response.content_length().unwrap_or(0);
    let mut downloaded: u64 = 0;

    let mut file = tokio::fs::File::create(dest).await.map_err(|error| {
        InstallError::io_with_path("failed to create download file", dest, &error)
    })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| InstallError::http("download stream error", error))?;
        file.write_all(&chunk).await.map_err(|error| {
            InstallError::io_with_path("failed to write download data", dest, &error)
        })?;
        downloaded += chunk.len() as u64;
        let _ = progress
            .send(InstallProgress::Downloading { downloaded, total })
            .await;
    }

    file.flush().await.map_err(|error| {
        InstallError::io_with_path("failed to flush download file", dest, &error)
    })?;

    info!("Download complete: {downloaded} bytes");
    Ok(())
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), InstallError> {
    let file = std::fs::File::open(zip_path)
        .map_err(|error| InstallError::io_with_path("failed to open zip file", zip_path, &error))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| InstallError::zip("failed to read zip archive", error))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| InstallError::zip("failed to read zip entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path");
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                InstallError::io_with_path(
                    "failed to create extraction directory",
                    &out_path,
                    &error,
                )
            })?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|error| {
                    InstallError::io_with_path(
                        "failed to create extraction parent directory",
                        parent,
                        &error,
                    )
                })?;
            }
            let mut outfile = std::fs::File::create(&out_path).map_err(|error| {
                InstallError::io_with_path("failed to create extracted file", &out_path, &error)
            })?;
            std::io::copy(&mut entry, &mut outfile).map_err(|error| {
                InstallError::io_with_path("failed to extract archive entry", &out_path, &error)
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    let _ =
                        std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
                }
            }
        }
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

/// Locate the replacement for `target` among the extracted files: an entry
/// with the same file name, or for bundles the first `.app` directory.
fn find_payload(extract_dir: &Path, target: &Path) -> Result<PathBuf, InstallError> {
    if let Some(name) = target.file_name() {
        let direct = extract_dir.join(name);
        if direct.exists() {
            return Ok(direct);
        }
    }

    let wants_bundle = target
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));
    if wants_bundle {
        for entry in std::fs::read_dir(extract_dir).map_err(|error| {
            InstallError::io_with_path("failed to read extract dir", extract_dir, &error)
        })? {
            let entry = entry.map_err(|error| {
                InstallError::io("failed to read extract directory entry", error)
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("app") && path.is_dir() {
                return Ok(path);
            }
        }
    }

    Err(InstallError::Invalid(format!(
        "No replacement for {} found in extracted archive",
        target.display()
    )))
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".old");
    target.with_file_name(name)
}

/// Swap `target` for its replacement, keeping the previous copy as
/// `<name>.old` until the next launch. The previous copy is restored when the
/// swap fails halfway.
fn replace_path(extract_dir: &Path, target: &Path) -> Result<(), InstallError> {
    let replacement = find_payload(extract_dir, target)?;
    let backup = backup_path(target);

    info!(
        "Replacing {} with {}",
        target.display(),
        replacement.display()
    );

    if backup.exists() {
        remove_path(&backup).map_err(|error| {
            InstallError::io_with_path("failed to remove old backup", &backup, &error)
        })?;
    }

    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(target, &backup).map_err(|error| {
            InstallError::io_with_path("failed to move current install aside", target, &error)
        })?;
    }

    if let Err(error) = move_path(&replacement, target) {
        warn!("Apply failed, restoring backup: {error}");
        let _ = remove_path(target);
        if had_previous {
            let _ = std::fs::rename(&backup, target);
        }
        return Err(error);
    }

    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("xattr")
            .args(["-cr", &target.to_string_lossy()])
            .output();
    }

    info!("Update applied to {}", target.display());
    Ok(())
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn move_path(src: &Path, dest: &Path) -> Result<(), InstallError> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }

    if src.is_dir() {
        copy_dir_recursive(src, dest)?;
        std::fs::remove_dir_all(src).map_err(|error| {
            InstallError::io_with_path("failed to clean up source directory", src, &error)
        })?;
    } else {
        std::fs::copy(src, dest).map_err(|error| {
            InstallError::io_with_path("failed to copy replacement file", src, &error)
        })?;
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<(), InstallError> {
    std::fs::create_dir_all(dest)
        .map_err(|error| InstallError::io_with_path("failed to create directory", dest, &error))?;

    for entry in std::fs::read_dir(src)
        .map_err(|error| InstallError::io_with_path("failed to read directory", src, &error))?
    {
        let entry =
            entry.map_err(|error| InstallError::io("failed to read directory entry", error))?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else {
            std::fs::copy(&src_path, &dest_path).map_err(|error| {
                InstallError::io(
                    "failed to copy file during update apply",
                    std::io::Error::new(
                        error.kind(),
                        format!("{} -> {}: {error}", src_path.display(), dest_path.display()),
                    ),
                )
            })?;
        }
    }
    Ok(())
}

/// The `.app` bundle enclosing the running executable.
fn current_app_bundle() -> Result<PathBuf, InstallError> {
    let exe = std::env::current_exe()
        .map_err(|error| InstallError::io("failed to get current executable", error))?;
    let mut path = exe.as_path();
    loop {
        if path.extension().and_then(|e| e.to_str()) == Some("app") {
            return Ok(path.to_path_buf());
        }
        path = path.parent().ok_or_else(|| {
            InstallError::Invalid("Current executable is not inside a .app bundle".to_string())
        })?;
    }
}

/// Remove leftovers of a previous update: the `.old` backup next to the
/// installed copy and abandoned download directories.
pub fn cleanup_previous_install(work_dir: &Path, target: &InstallTarget) {
    let installed = match target {
        InstallTarget::Path(path) => Some(path.clone()),
        InstallTarget::RunningApp => current_app_bundle().ok(),
    };
    if let Some(installed) = installed {
        let old = backup_path(&installed);
        if old.exists() {
            info!("Cleaning up previous install: {}", old.display());
            let _ = remove_path(&old);
        }
    }

    if let Ok(entries) = std::fs::read_dir(work_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && entry.file_name().to_string_lossy().starts_with(".tmp") {
                debug!("Cleaning up update temp dir: {}", path.display());
                let _ = std::fs::remove_dir_all(&path);
            }
        }
    }
}

/// Relaunch the current application bundle.
///
/// # Errors
/// Returns an error if the running app bundle cannot be located or reopened.
pub fn restart_app() -> Result<(), InstallError> {
    let bundle = current_app_bundle()?;
    info!("Relaunching {}", bundle.display());
    std::process::Command::new("open")
        .args(["-n", &bundle.to_string_lossy()])
        .spawn()
        .map_err(|error| InstallError::io("failed to restart app", error))?;
    Ok(())
}
