//! The update service.
//!
//! [`Updater::spawn`] starts a task that owns the [`UpdateState`] and is the
//! only writer to it. Callers talk to it through a cloneable
//! [`UpdaterHandle`]: commands are queued and applied in order, while fetches
//! and installs run on worker tasks whose results are posted back to the same
//! queue. Subscribers are invoked on the service task after the snapshot read
//! by the handle has been updated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, Failure, UpdaterError};
use crate::install::{InstallExecutor, InstallOutcome, InstallProgress};
use crate::release::{ChannelId, ReleaseError, ReleaseInfo, ReleaseSource};
use crate::retry::retry_with_delays;
use crate::state::UpdateState;
use crate::version::Version;

const COMMAND_QUEUE_CAPACITY: usize = 32;
const PROGRESS_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Version of the running application, supplied by the host.
    pub running_version: Version,
    pub channel: ChannelId,
    /// Delay before each check attempt; network failures move on to the next
    /// entry.
    pub retry_delays: Vec<Duration>,
}

impl UpdaterConfig {
    #[must_use]
    pub fn new(running_version: Version, channel: ChannelId) -> Self {
        Self {
            running_version,
            channel,
            retry_delays: [0, 2, 5].into_iter().map(Duration::from_secs).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// Emitted once per transition. `interactive` echoes the request that
    /// caused it.
    StateChanged {
        state: UpdateState,
        interactive: bool,
    },
    Progress(InstallProgress),
    /// Follows the transition to `Restarting`.
    InstallFinished(InstallOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl Subscribers {
    fn add(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    fn notify(&self, event: &UpdateEvent) {
        // Callbacks run unlocked so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    state: UpdateState,
    last_checked_at: Option<DateTime<Utc>>,
}

enum Command {
    Check {
        interactive: bool,
    },
    Install {
        interactive: bool,
        reply: oneshot::Sender<Result<(), UpdaterError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), UpdaterError>>,
    },
}

enum Completion {
    Checked {
        interactive: bool,
        result: Result<ReleaseInfo, Failure>,
    },
    Installed {
        interactive: bool,
        result: Result<InstallOutcome, Failure>,
    },
}

pub struct Updater {
    config: UpdaterConfig,
    source: Arc<dyn ReleaseSource>,
    executor: Arc<dyn InstallExecutor>,
    subscribers: Arc<Subscribers>,
    snapshot: watch::Sender<Snapshot>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Updater {
    /// Start the service on the current tokio runtime.
    pub fn spawn(
        config: UpdaterConfig,
        source: Arc<dyn ReleaseSource>,
        executor: Arc<dyn InstallExecutor>,
    ) -> UpdaterHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let subscribers = Arc::new(Subscribers::default());
        let shutdown = CancellationToken::new();

        let handle = UpdaterHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            subscribers: Arc::clone(&subscribers),
            source: Arc::clone(&source),
            channel: config.channel.clone(),
            shutdown: shutdown.clone(),
        };

        let updater = Self {
            config,
            source,
            executor,
            subscribers,
            snapshot: snapshot_tx,
            completions: completions_tx,
        };
        tokio::spawn(updater.run(commands_rx, completions_rx, shutdown));

        handle
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        shutdown: CancellationToken,
    ) {
        info!(
            "Updater started on channel '{}' (running {})",
            self.config.channel, self.config.running_version
        );
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }
        debug!("Updater stopped");
    }

    fn current(&self) -> UpdateState {
        self.snapshot.borrow().state.clone()
    }

    fn transition(&self, next: UpdateState, interactive: bool) {
        let previous = self.snapshot.borrow().state.name();
        self.snapshot.send_modify(|snapshot| snapshot.state = next.clone());
        info!("Update state: {previous} -> {}", next.name());
        self.subscribers.notify(&UpdateEvent::StateChanged {
            state: next,
            interactive,
        });
    }

    fn handle_command(&self, command: Command) {
        match command {
            Command::Check { interactive } => self.start_check(interactive),
            Command::Install { interactive, reply } => {
                let _ = reply.send(self.start_install(interactive));
            }
            Command::Clear { reply } => {
                let current = self.current();
                let result = current.clear().map(|idle| {
                    if current != idle {
                        self.transition(idle, true);
                    }
                });
                let _ = reply.send(result);
            }
        }
    }

    fn start_check(&self, interactive: bool) {
        let current = self.current();
        let Some(checking) = current.begin_check() else {
            debug!("Ignoring update check while {}", current.name());
            return;
        };
        self.transition(checking, interactive);

        let source = Arc::clone(&self.source);
        let channel = self.config.channel.clone();
        let delays = self.config.retry_delays.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = retry_with_delays(
                "update check",
                &delays,
                |error: &ReleaseError| error.kind() == ErrorKind::Network,
                || source.fetch_latest(&channel),
            )
            .await
            .map_err(|error| {
                warn!("Update check on channel '{channel}' failed: {error}");
                Failure::from(&error)
            });
            let _ = completions.send(Completion::Checked {
                interactive,
                result,
            });
        });
    }

    fn start_install(&self, interactive: bool) -> Result<(), UpdaterError> {
        let current = self.current();
        let installing = current.begin_install()?;
        let Some(release) = current.pending_release().cloned() else {
            return Ok(());
        };
        self.transition(installing, interactive);
        info!("Installing {} ({})", release.version, release.asset_name);

        let executor = Arc::clone(&self.executor);
        let subscribers = Arc::clone(&self.subscribers);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_QUEUE_CAPACITY);
            let forward = async {
                while let Some(progress) = progress_rx.recv().await {
                    subscribers.notify(&UpdateEvent::Progress(progress));
                }
            };
            let (result, ()) = tokio::join!(executor.install(&release, progress_tx), forward);
            let result = result.map_err(|error| {
                warn!("Installing {} failed: {error}", release.version);
                Failure::from(&error)
            });
            let _ = completions.send(Completion::Installed {
                interactive,
                result,
            });
        });
        Ok(())
    }

    fn handle_completion(&self, completion: Completion) {
        let current = self.current();
        match completion {
            Completion::Checked {
                interactive,
                result,
            } => {
                let Some(next) = current.finish_check(result, &self.config.running_version)
                else {
                    warn!("Dropping check result received while {}", current.name());
                    return;
                };
                self.snapshot.send_modify(|snapshot| snapshot.last_checked_at = Some(Utc::now()));
                match &next {
                    UpdateState::UpdateAvailable(release) => {
                        info!("Update available: {} ({})", release.version, release.title);
                    }
                    UpdateState::UpToDate => {
                        info!("{} is up to date", self.config.running_version);
                    }
                    _ => {}
                }
                self.transition(next, interactive);
            }
            Completion::Installed {
                interactive,
                result,
            } => {
                let outcome = result.as_ref().ok().copied();
                let Some(next) = current.finish_install(result.map(|_| ())) else {
                    warn!("Dropping install result received while {}", current.name());
                    return;
                };
                self.transition(next, interactive);
                if let Some(outcome) = outcome {
                    self.subscribers.notify(&UpdateEvent::InstallFinished(outcome));
                }
            }
        }
    }
}

/// Cheap, cloneable access to a running [`Updater`].
#[derive(Clone)]
pub struct UpdaterHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    subscribers: Arc<Subscribers>,
    source: Arc<dyn ReleaseSource>,
    channel: ChannelId,
    shutdown: CancellationToken,
}

impl UpdaterHandle {
    async fn send(&self, command: Command) -> Result<(), UpdaterError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| UpdaterError::Stopped)
    }

    /// Queue a check. Ignored while a check or install is outstanding, so at
    /// most one fetch is ever in flight. Check failures are reported through
    /// the state, never here.
    ///
    /// # Errors
    /// Returns `Stopped` once the service has shut down.
    pub async fn check_for_updates(&self, interactive: bool) -> Result<(), UpdaterError> {
        self.send(Command::Check { interactive }).await
    }

    /// Start installing the pending release. Returns once `Installing` has
    /// been entered; the outcome arrives as a later transition.
    ///
    /// # Errors
    /// Returns `InvalidState` without touching the state unless an update is
    /// pending, and `Stopped` once the service has shut down.
    pub async fn install_pending_update(&self, interactive: bool) -> Result<(), UpdaterError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Install { interactive, reply }).await?;
        response.await.map_err(|_| UpdaterError::Stopped)?
    }

    /// Return to `Idle`.
    ///
    /// # Errors
    /// Returns `InvalidState` while a check or install is outstanding.
    pub async fn clear(&self) -> Result<(), UpdaterError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Clear { reply }).await?;
        response.await.map_err(|_| UpdaterError::Stopped)?
    }

    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.snapshot.borrow().state.clone()
    }

    #[must_use]
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.borrow().last_checked_at
    }

    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.snapshot.borrow().state.has_pending_update()
    }

    #[must_use]
    pub fn pending_release(&self) -> Option<ReleaseInfo> {
        self.snapshot.borrow().state.pending_release().cloned()
    }

    /// # Errors
    /// Returns `InvalidState` when no update is pending.
    pub fn pending_update_title(&self) -> Result<String, UpdaterError> {
        let snapshot = self.snapshot.borrow();
        snapshot
            .state
            .pending_release()
            .map(|release| release.title.clone())
            .ok_or(UpdaterError::InvalidState {
                operation: "read pending update title",
                state: snapshot.state.name(),
            })
    }

    /// Page of the pending release, or the channel's release list.
    #[must_use]
    pub fn releases_page_url(&self) -> Option<String> {
        self.snapshot
            .borrow()
            .state
            .pending_release()
            .map(|release| release.page_url.clone())
            .or_else(|| self.source.releases_page_url(&self.channel))
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Stop the service. Outstanding workers finish but their results are
    /// dropped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
