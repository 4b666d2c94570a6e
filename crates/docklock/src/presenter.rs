//! Turns updater events into user-facing output.
//!
//! Interactive requests get a dialog for every outcome. Background requests
//! never interrupt: failures and "up to date" go to the log, and a found
//! update only changes the menu status line.

use docklock_core::{InstallProgress, UpdateEvent, UpdateState, Version};
use log::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    Dialog { title: String, body: String },
    Status(String),
    Log(String),
    Nothing,
}

pub struct Presenter {
    running_version: Version,
}

impl Presenter {
    pub fn new(running_version: Version) -> Self {
        Self { running_version }
    }

    pub fn presentation(&self, event: &UpdateEvent) -> Presentation {
        match event {
            UpdateEvent::StateChanged { state, interactive } => {
                self.state_presentation(state, *interactive)
            }
            UpdateEvent::Progress(progress) => progress_status(progress),
            UpdateEvent::InstallFinished(outcome) => {
                Presentation::Log(format!("Install finished: {outcome:?}"))
            }
        }
    }

    fn state_presentation(&self, state: &UpdateState, interactive: bool) -> Presentation {
        match state {
            UpdateState::Idle => Presentation::Nothing,
            UpdateState::Checking if interactive => {
                Presentation::Status("Checking for updates…".to_string())
            }
            UpdateState::Checking => Presentation::Nothing,
            UpdateState::UpToDate if interactive => Presentation::Dialog {
                title: "You're up to date!".to_string(),
                body: format!("DockLock {} is the newest version.", self.running_version),
            },
            UpdateState::UpToDate => {
                Presentation::Log(format!("DockLock {} is up to date", self.running_version))
            }
            UpdateState::UpdateAvailable(release) if interactive => Presentation::Dialog {
                title: format!("{} is available", release.title),
                body: format!(
                    "You have {}.\n\n{}",
                    self.running_version,
                    release.notes.as_deref().unwrap_or("No release notes.")
                ),
            },
            UpdateState::UpdateAvailable(release) => {
                Presentation::Status(format!("Update available: {}", release.title))
            }
            UpdateState::CheckFailed(failure) if interactive => Presentation::Dialog {
                title: failure.kind.summary().to_string(),
                body: failure.message.clone(),
            },
            UpdateState::CheckFailed(failure) => {
                Presentation::Log(format!("Background update check failed: {failure}"))
            }
            UpdateState::Installing(release) => {
                Presentation::Status(format!("Installing {}…", release.title))
            }
            UpdateState::InstallFailed { release, failure } if interactive => {
                Presentation::Dialog {
                    title: failure.kind.summary().to_string(),
                    body: format!("{} was not installed: {}", release.title, failure.message),
                }
            }
            UpdateState::InstallFailed { release, failure } => Presentation::Log(format!(
                "Automatic install of {} failed: {failure}",
                release.title
            )),
            UpdateState::Restarting(release) => {
                Presentation::Status(format!("Restarting into {}…", release.title))
            }
        }
    }

    pub fn present(&self, event: &UpdateEvent) {
        match self.presentation(event) {
            Presentation::Dialog { title, body } => {
                info!("Presenting: {title}");
                println!("{title}\n{body}");
            }
            Presentation::Status(line) => {
                debug!("Status: {line}");
                println!("{line}");
            }
            Presentation::Log(message) => {
                if matches!(
                    event,
                    UpdateEvent::StateChanged {
                        state: UpdateState::CheckFailed(_) | UpdateState::InstallFailed { .. },
                        ..
                    }
                ) {
                    warn!("{message}");
                } else {
                    info!("{message}");
                }
            }
            Presentation::Nothing => {}
        }
    }
}

fn progress_status(progress: &InstallProgress) -> Presentation {
    match progress {
        InstallProgress::Downloading { downloaded, total } if *total > 0 => {
            let percent = downloaded.saturating_mul(100) / total;
            Presentation::Status(format!("Downloading… {percent}%"))
        }
        InstallProgress::Downloading { downloaded, .. } => {
            Presentation::Status(format!("Downloading… {downloaded} bytes"))
        }
        InstallProgress::Verifying => Presentation::Status("Verifying…".to_string()),
        InstallProgress::Extracting => Presentation::Status("Extracting…".to_string()),
        InstallProgress::Applying => Presentation::Status("Installing…".to_string()),
    }
}
