use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use docklock_core::{
    BundleInstaller, ChannelId, GitHubReleaseSource, InstallOutcome, InstallTarget, InstallerConfig,
    Sha256Verifier, UpdateEvent, UpdateState, Updater, UpdaterConfig, UpdaterError, UpdaterHandle,
    Version, cleanup_previous_install, restart_app, spawn_background_checks,
};
use docklock_platform::AppPaths;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::presenter::Presenter;
use crate::settings::{AppSettings, UpdateBehavior};

const USER_AGENT: &str = concat!("docklock/", env!("CARGO_PKG_VERSION"));

/// The menu-bar host: owns one updater and reacts to its events.
pub struct App {
    settings: AppSettings,
    updater: UpdaterHandle,
    events: mpsc::UnboundedReceiver<UpdateEvent>,
    presenter: Presenter,
}

impl App {
    pub fn new(
        paths: &AppPaths,
        settings: AppSettings,
        channel: Option<ChannelId>,
    ) -> Result<Self, AppError> {
        let running_version = Version::parse(env!("CARGO_PKG_VERSION"))
            .map_err(|error| AppError::setup("running version", error))?;
        let channel = channel.unwrap_or_else(|| settings.channel.clone());
        if !settings.repositories.contains_key(&channel) {
            return Err(AppError::UnknownChannel { channel });
        }

        let source = GitHubReleaseSource::new(settings.source_config(USER_AGENT))?;
        let http_timeout = Duration::from_secs(settings.http_timeout_secs);
        let verifier = Sha256Verifier::with_timeout(http_timeout, USER_AGENT)
            .map_err(|error| AppError::setup("verifier", error))?;

        let updates_dir = paths.updates_dir();
        cleanup_previous_install(&updates_dir, &InstallTarget::RunningApp);

        let mut installer_config = InstallerConfig::new(updates_dir, USER_AGENT);
        installer_config.timeout = Duration::from_secs(settings.download_timeout_secs);
        installer_config.connect_timeout = Duration::from_secs(settings.connect_timeout_secs);
        let installer = BundleInstaller::new(installer_config, Arc::new(verifier))?;

        let mut config = UpdaterConfig::new(running_version.clone(), channel);
        config.retry_delays = settings.retry_delays();
        let updater = Updater::spawn(config, Arc::new(source), Arc::new(installer));

        let (tx, events) = mpsc::unbounded_channel();
        updater.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });

        Ok(Self {
            settings,
            updater,
            events,
            presenter: Presenter::new(running_version),
        })
    }

    async fn next_event(&mut self) -> Result<UpdateEvent, AppError> {
        let event = self
            .events
            .recv()
            .await
            .ok_or(AppError::Updater(UpdaterError::Stopped))?;
        self.presenter.present(&event);
        Ok(event)
    }

    /// Wait until the current check settles.
    async fn settled_check(&mut self) -> Result<UpdateState, AppError> {
        loop {
            if let UpdateEvent::StateChanged { state, .. } = self.next_event().await?
                && matches!(
                    state,
                    UpdateState::UpToDate
                        | UpdateState::UpdateAvailable(_)
                        | UpdateState::CheckFailed(_)
                )
            {
                return Ok(state);
            }
        }
    }

    pub async fn check(&mut self) -> Result<ExitCode, AppError> {
        self.updater.check_for_updates(true).await?;
        match self.settled_check().await? {
            UpdateState::CheckFailed(failure) => Err(AppError::update("Update check", failure)),
            _ => Ok(ExitCode::SUCCESS),
        }
    }

    pub async fn install(&mut self, restart: bool) -> Result<ExitCode, AppError> {
        self.updater.check_for_updates(true).await?;
        match self.settled_check().await? {
            UpdateState::CheckFailed(failure) => {
                return Err(AppError::update("Update check", failure));
            }
            UpdateState::UpdateAvailable(_) => {}
            _ => return Ok(ExitCode::SUCCESS),
        }

        self.updater.install_pending_update(true).await?;
        loop {
            match self.next_event().await? {
                UpdateEvent::StateChanged {
                    state: UpdateState::InstallFailed { failure, .. },
                    ..
                } => return Err(AppError::update("Install", failure)),
                UpdateEvent::InstallFinished(outcome) => {
                    return finish_install(outcome, restart);
                }
                _ => {}
            }
        }
    }

    /// Headless stand-in for the menu bar: background checks until Ctrl-C.
    pub async fn watch(&mut self) -> Result<ExitCode, AppError> {
        if self.settings.update_behavior == UpdateBehavior::DoNotCheck {
            info!("Update checks are disabled");
            return Ok(ExitCode::SUCCESS);
        }

        let cancel = CancellationToken::new();
        let scheduler = spawn_background_checks(
            self.updater.clone(),
            self.settings.check_schedule(),
            cancel.clone(),
        );

        let result = loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => break Ok(ExitCode::SUCCESS),
                event = self.next_event() => event?,
            };
            match event {
                UpdateEvent::StateChanged {
                    state: UpdateState::UpdateAvailable(release),
                    interactive: false,
                } if self.settings.update_behavior == UpdateBehavior::AutomaticallyUpdate => {
                    info!("Automatically installing {}", release.version);
                    let started = self.updater.install_pending_update(false).await;
                    if let Err(error) = tolerate_stale_install(started) {
                        break Err(error);
                    }
                }
                UpdateEvent::InstallFinished(outcome) => break finish_install(outcome, true),
                _ => {}
            }
        };

        cancel.cancel();
        let _ = scheduler.await;
        self.updater.shutdown();
        result
    }

    pub fn open_releases_page(&self) -> Result<ExitCode, AppError> {
        let Some(url) = self.updater.releases_page_url() else {
            return Err(AppError::UnknownChannel {
                channel: self.updater.channel().clone(),
            });
        };
        debug!("Opening {url}");
        open::that(&url).map_err(|error| AppError::OpenUrl {
            url,
            details: error.to_string(),
        })?;
        Ok(ExitCode::SUCCESS)
    }
}

/// The `UpdateAvailable` that triggered an automatic install may already be
/// stale when a scheduled check has started since. Only a stopped updater
/// ends the watch.
fn tolerate_stale_install(started: Result<(), UpdaterError>) -> Result<(), AppError> {
    match started {
        Err(UpdaterError::Stopped) => Err(UpdaterError::Stopped.into()),
        Err(error) => {
            warn!("Skipping automatic install: {error}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn finish_install(outcome: InstallOutcome, restart: bool) -> Result<ExitCode, AppError> {
    match outcome {
        InstallOutcome::RestartRequired if restart => {
            restart_app().map_err(|error| AppError::auto_update_failed("restart", error))?;
            Ok(ExitCode::SUCCESS)
        }
        InstallOutcome::RestartRequired => {
            println!("Update installed. Restart DockLock to finish.");
            Ok(ExitCode::SUCCESS)
        }
        InstallOutcome::Installed => {
            println!("Update installed.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use docklock_core::{StateName, UpdaterError};

    use super::tolerate_stale_install;
    use crate::error::AppError;

    #[test]
    fn stale_auto_install_keeps_watching() {
        let raced = Err(UpdaterError::InvalidState {
            operation: "install update",
            state: StateName::Checking,
        });

        assert!(tolerate_stale_install(raced).is_ok());
        assert!(tolerate_stale_install(Ok(())).is_ok());
    }

    #[test]
    fn stopped_updater_ends_the_watch() {
        assert!(matches!(
            tolerate_stale_install(Err(UpdaterError::Stopped)),
            Err(AppError::Updater(UpdaterError::Stopped))
        ));
    }
}
