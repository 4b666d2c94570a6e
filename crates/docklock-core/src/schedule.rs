use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::UpdaterError;
use crate::updater::UpdaterHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSchedule {
    pub initial_delay: Duration,
    pub interval: Duration,
}

impl CheckSchedule {
    #[must_use]
    pub fn from_settings(initial_delay_secs: u64, interval_hours: u64) -> Self {
        Self {
            initial_delay: Duration::from_secs(initial_delay_secs),
            interval: Duration::from_secs(interval_hours.max(1).saturating_mul(60 * 60)),
        }
    }
}

/// Post silent checks to `updater` on `schedule` until `cancel` fires or the
/// updater stops.
pub fn spawn_background_checks(
    updater: UpdaterHandle,
    schedule: CheckSchedule,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Background update checks every {}s after {}s",
            schedule.interval.as_secs(),
            schedule.initial_delay.as_secs()
        );
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(schedule.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Running scheduled update check");
                    if let Err(UpdaterError::Stopped) = updater.check_for_updates(false).await {
                        break;
                    }
                }
            }
        }
        debug!("Background update checks stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::install::{InstallError, InstallExecutor, InstallOutcome, InstallProgress};
    use crate::release::{ChannelId, ReleaseError, ReleaseInfo, ReleaseSource};
    use crate::state::tests::release;
    use crate::updater::{Updater, UpdaterConfig};
    use crate::version::Version;

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReleaseSource for CountingSource {
        async fn fetch_latest(&self, _channel: &ChannelId) -> Result<ReleaseInfo, ReleaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(release("1.0.0"))
        }
    }

    struct NoInstall;

    #[async_trait]
    impl InstallExecutor for NoInstall {
        async fn install(
            &self,
            _release: &ReleaseInfo,
            _progress: mpsc::Sender<InstallProgress>,
        ) -> Result<InstallOutcome, InstallError> {
            Err(InstallError::Invalid("not used".to_string()))
        }
    }

    fn updater(source: &Arc<CountingSource>) -> UpdaterHandle {
        Updater::spawn(
            UpdaterConfig::new(
                Version::parse("1.0.0").expect("test version should parse"),
                ChannelId::stable(),
            ),
            Arc::clone(source) as Arc<dyn ReleaseSource>,
            Arc::new(NoInstall),
        )
    }

    #[test]
    fn schedule_from_settings_never_uses_a_zero_interval() {
        let schedule = CheckSchedule::from_settings(5, 0);
        assert_eq!(schedule.initial_delay, Duration::from_secs(5));
        assert_eq!(schedule.interval, Duration::from_secs(3600));
    }

    #[test]
    fn huge_interval_saturates_instead_of_overflowing() {
        let schedule = CheckSchedule::from_settings(0, u64::MAX);
        assert_eq!(schedule.interval, Duration::from_secs(u64::MAX));
    }

    #[tokio::test]
    async fn posts_checks_until_cancelled() {
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();
        let task = spawn_background_checks(
            updater(&source),
            CheckSchedule {
                initial_delay: Duration::ZERO,
                interval: Duration::from_millis(20),
            },
            cancel.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while source.calls.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduled checks should run");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler should stop in time")
            .expect("scheduler task should not panic");
    }

    #[tokio::test]
    async fn cancelled_before_initial_delay_never_checks() {
        let source = Arc::new(CountingSource::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        spawn_background_checks(
            updater(&source),
            CheckSchedule {
                initial_delay: Duration::from_secs(60),
                interval: Duration::from_secs(60),
            },
            cancel,
        )
        .await
        .expect("scheduler task should not panic");

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stops_when_updater_shuts_down() {
        let source = Arc::new(CountingSource::default());
        let handle = updater(&source);
        handle.shutdown();

        let task = spawn_background_checks(
            handle,
            CheckSchedule {
                initial_delay: Duration::ZERO,
                interval: Duration::from_millis(10),
            },
            CancellationToken::new(),
        );

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("scheduler should stop once the updater is gone")
            .expect("scheduler task should not panic");
    }
}
