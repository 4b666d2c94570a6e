use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use docklock_core::{ChannelId, CheckSchedule, GitHubSourceConfig};
use docklock_platform::AppPaths;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub update_behavior: UpdateBehavior,

    #[serde(default)]
    pub channel: ChannelId,

    /// `owner/name` of the repository publishing each channel.
    #[serde(default = "default_repositories")]
    pub repositories: HashMap<ChannelId, String>,

    /// Channels whose pre-releases count as updates.
    #[serde(default = "default_prerelease_channels")]
    pub include_prereleases: Vec<ChannelId>,

    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u64,

    #[serde(default = "default_initial_check_delay")]
    pub initial_check_delay_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateBehavior {
    DoNotCheck,
    #[default]
    CheckOnly,
    AutomaticallyUpdate,
}

const DEFAULT_REPOSITORY: &str = "docklock/docklock";
const BETA_CHANNEL: &str = "beta";

fn default_repositories() -> HashMap<ChannelId, String> {
    HashMap::from([
        (ChannelId::stable(), DEFAULT_REPOSITORY.to_string()),
        (ChannelId::new(BETA_CHANNEL), DEFAULT_REPOSITORY.to_string()),
    ])
}

fn default_prerelease_channels() -> Vec<ChannelId> {
    vec![ChannelId::new(BETA_CHANNEL)]
}

fn default_check_interval() -> u64 {
    24
}

fn default_initial_check_delay() -> u64 {
    5
}

fn default_http_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_download_timeout() -> u64 {
    600
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 2, 5]
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            update_behavior: UpdateBehavior::default(),
            channel: ChannelId::stable(),
            repositories: default_repositories(),
            include_prereleases: default_prerelease_channels(),
            api_base_url: None,
            check_interval_hours: default_check_interval(),
            initial_check_delay_secs: default_initial_check_delay(),
            http_timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            download_timeout_secs: default_download_timeout(),
            retry_delays_secs: default_retry_delays(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl AppSettings {
    pub fn load(paths: &AppPaths) -> Self {
        Self::load_from(&paths.settings_file())
    }

    fn load_from(settings_path: &Path) -> Self {
        if !settings_path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(settings_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                log::warn!("Ignoring malformed settings file: {error}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }

    pub fn source_config(&self, user_agent: &str) -> GitHubSourceConfig {
        let mut config = self.repositories.iter().fold(
            GitHubSourceConfig::new(user_agent),
            |config, (channel, repository)| {
                config.with_channel(
                    channel.clone(),
                    repository.clone(),
                    self.include_prereleases.contains(channel),
                )
            },
        );
        if let Some(api_base_url) = &self.api_base_url {
            config.api_base_url.clone_from(api_base_url);
        }
        config.timeout = Duration::from_secs(self.http_timeout_secs);
        config.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        config
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }

    pub fn check_schedule(&self) -> CheckSchedule {
        CheckSchedule::from_settings(self.initial_check_delay_secs, self.check_interval_hours)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AppSettings, UpdateBehavior};
    use docklock_core::ChannelId;
    use docklock_platform::AppPaths;

    #[test]
    fn app_settings_defaults_match_expected_timeouts() {
        let settings = AppSettings::default();

        assert_eq!(settings.update_behavior, UpdateBehavior::CheckOnly);
        assert_eq!(settings.channel, ChannelId::stable());
        assert_eq!(settings.check_interval_hours, 24);
        assert_eq!(settings.initial_check_delay_secs, 5);
        assert_eq!(settings.http_timeout_secs, 10);
        assert_eq!(settings.connect_timeout_secs, 5);
        assert_eq!(settings.download_timeout_secs, 600);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.retry_delays_secs, vec![0, 2, 5]);
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let value = json!({
            "update_behavior": "AutomaticallyUpdate",
            "channel": "beta",
            "http_timeout_secs": 3
        });

        let settings: AppSettings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert_eq!(settings.update_behavior, UpdateBehavior::AutomaticallyUpdate);
        assert_eq!(settings.channel, ChannelId::new("beta"));
        assert_eq!(settings.http_timeout_secs, 3);
        assert_eq!(settings.check_interval_hours, 24);
        assert_eq!(settings.repositories.len(), 2);
    }

    #[test]
    fn source_config_carries_channels_and_timeouts() {
        let mut settings = AppSettings {
            api_base_url: Some("http://127.0.0.1:9".to_string()),
            http_timeout_secs: 7,
            ..AppSettings::default()
        };
        settings
            .repositories
            .insert(ChannelId::new("nightly"), "acme/docklock-nightly".to_string());

        let config = settings.source_config("docklock-tests");

        assert_eq!(config.api_base_url, "http://127.0.0.1:9");
        assert_eq!(config.timeout.as_secs(), 7);
        assert!(!config.channels[&ChannelId::stable()].include_prereleases);
        assert!(config.channels[&ChannelId::new("beta")].include_prereleases);
        assert_eq!(
            config.channels[&ChannelId::new("nightly")].repository,
            "acme/docklock-nightly"
        );
    }

    #[test]
    fn load_falls_back_to_defaults_and_round_trips_saved_settings() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let paths = AppPaths::rooted_at(temp.path());

        assert_eq!(
            AppSettings::load(&paths).update_behavior,
            UpdateBehavior::CheckOnly
        );

        paths.ensure_dirs().expect("dirs should be created");
        std::fs::write(paths.settings_file(), "{ not json").expect("file should be written");
        assert_eq!(AppSettings::load(&paths).check_interval_hours, 24);

        let settings = AppSettings {
            update_behavior: UpdateBehavior::DoNotCheck,
            ..AppSettings::default()
        };
        settings.save(&paths).expect("settings should save");
        assert_eq!(
            AppSettings::load(&paths).update_behavior,
            UpdateBehavior::DoNotCheck
        );
    }
}
