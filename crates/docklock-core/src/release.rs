use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ErrorKind, Failure};
use crate::version::{Version, VersionParseError};

const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
const DEFAULT_WEB_BASE_URL: &str = "https://github.com";
const DEFAULT_ASSET_SUFFIX: &str = "-macos.zip";
const RELEASE_LIST_PAGE_SIZE: u32 = 30;
const CHECKSUM_FILE_NAMES: [&str; 3] = ["SHA256SUMS", "SHA256SUMS.txt", "checksums.txt"];

/// A named release track such as `stable` or `beta`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub const STABLE: &'static str = "stable";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn stable() -> Self {
        Self::new(Self::STABLE)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::stable()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where the expected digest of an artifact can be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityRef {
    /// Lowercase hex SHA-256 published alongside the asset.
    Sha256(String),
    /// A `sha256sum`-style file listing digests by asset name.
    ChecksumFile { url: String },
}

/// Remote-reported identity of the newest release on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: Version,
    pub tag: String,
    pub title: String,
    pub notes: Option<String>,
    pub page_url: String,
    pub asset_name: String,
    pub download_url: String,
    pub download_size: Option<u64>,
    pub integrity: Option<IntegrityRef>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("failed to build release client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to fetch release for channel '{channel}': {source}")]
    Request {
        channel: ChannelId,
        #[source]
        source: reqwest::Error,
    },
    #[error("release check failed with HTTP {status}{body_snippet}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("failed to parse release response: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("release {tag} has an invalid version: {source}")]
    Version {
        tag: String,
        #[source]
        source: VersionParseError,
    },
    #[error("no release found for channel '{channel}': {reason}")]
    NotFound { channel: ChannelId, reason: String },
}

impl ReleaseError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Client(_) | Self::Request { .. } | Self::HttpStatus { .. } => ErrorKind::Network,
            Self::Parse(_) | Self::Version { .. } => ErrorKind::Parse,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    fn not_found(channel: &ChannelId, reason: impl Into<String>) -> Self {
        Self::NotFound {
            channel: channel.clone(),
            reason: reason.into(),
        }
    }
}

impl From<&ReleaseError> for Failure {
    fn from(error: &ReleaseError) -> Self {
        Failure::new(error.kind(), error.to_string())
    }
}

/// Fetches release metadata. One network request per call and no retries;
/// retrying is the updater's decision.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_latest(&self, channel: &ChannelId) -> Result<ReleaseInfo, ReleaseError>;

    /// Browser URL listing every release of the channel, if known.
    fn releases_page_url(&self, _channel: &ChannelId) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSource {
    /// `owner/name` of the GitHub repository publishing this channel.
    pub repository: String,
    pub include_prereleases: bool,
}

#[derive(Debug, Clone)]
pub struct GitHubSourceConfig {
    pub api_base_url: String,
    pub web_base_url: String,
    pub channels: HashMap<ChannelId, ChannelSource>,
    pub asset_suffix: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl GitHubSourceConfig {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            channels: HashMap::new(),
            asset_suffix: DEFAULT_ASSET_SUFFIX.to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            user_agent: user_agent.into(),
        }
    }

    #[must_use]
    pub fn with_channel(
        mut self,
        channel: impl Into<ChannelId>,
        repository: impl Into<String>,
        include_prereleases: bool,
    ) -> Self {
        self.channels.insert(
            channel.into(),
            ChannelSource {
                repository: repository.into(),
                include_prereleases,
            },
        );
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    html_url: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

pub struct GitHubReleaseSource {
    client: reqwest::Client,
    config: GitHubSourceConfig,
}

impl GitHubReleaseSource {
    /// Build a source with its own HTTP client bounded by the configured
    /// timeouts.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: GitHubSourceConfig) -> Result<Self, ReleaseError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ReleaseError::Client)?;
        Ok(Self { client, config })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        channel: &ChannelId,
        url: &str,
    ) -> Result<T, ReleaseError> {
        debug!("Fetching release metadata from {url}");
        let response = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|source| ReleaseError::Request {
                channel: channel.clone(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReleaseError::not_found(channel, "no published release"));
        }
        if !status.is_success() {
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(ReleaseError::HttpStatus {
                status,
                body_snippet,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| ReleaseError::Request {
                channel: channel.clone(),
                source,
            })?;
        serde_json::from_slice(&body).map_err(ReleaseError::Parse)
    }

    fn release_info(
        &self,
        channel: &ChannelId,
        release: GitHubRelease,
    ) -> Result<ReleaseInfo, ReleaseError> {
        let version = Version::parse(&release.tag_name).map_err(|source| ReleaseError::Version {
            tag: release.tag_name.clone(),
            source,
        })?;

        let suffix = &self.config.asset_suffix;
        let asset = release
            .assets
            .iter()
            .find(|asset| asset.name.ends_with(suffix.as_str()))
            .ok_or_else(|| {
                ReleaseError::not_found(
                    channel,
                    format!("release {} has no asset ending in '{suffix}'", release.tag_name),
                )
            })?;

        let integrity = asset
            .digest
            .as_deref()
            .and_then(parse_sha256_digest)
            .map(IntegrityRef::Sha256)
            .or_else(|| checksum_asset(&release.assets, &asset.name));

        let title = release
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| release.tag_name.clone(), ToString::to_string);

        Ok(ReleaseInfo {
            version,
            tag: release.tag_name.clone(),
            title,
            notes: release.body.filter(|body| !body.trim().is_empty()),
            page_url: release.html_url,
            asset_name: asset.name.clone(),
            download_url: asset.browser_download_url.clone(),
            download_size: asset.size,
            integrity,
            published_at: release.published_at,
        })
    }

    fn channel_source(&self, channel: &ChannelId) -> Result<&ChannelSource, ReleaseError> {
        self.config
            .channels
            .get(channel)
            .ok_or_else(|| ReleaseError::not_found(channel, "channel is not configured"))
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn fetch_latest(&self, channel: &ChannelId) -> Result<ReleaseInfo, ReleaseError> {
        let source = self.channel_source(channel)?;
        let api = self.config.api_base_url.trim_end_matches('/');

        let release = if source.include_prereleases {
            let url = format!(
                "{api}/repos/{}/releases?per_page={RELEASE_LIST_PAGE_SIZE}",
                source.repository
            );
            let releases: Vec<GitHubRelease> = self.get_json(channel, &url).await?;
            newest_release(releases)
                .ok_or_else(|| ReleaseError::not_found(channel, "no published release"))?
        } else {
            let url = format!("{api}/repos/{}/releases/latest", source.repository);
            self.get_json(channel, &url).await?
        };

        let info = self.release_info(channel, release)?;
        info!(
            "Latest release on channel '{channel}' is {} ({})",
            info.version, info.asset_name
        );
        Ok(info)
    }

    fn releases_page_url(&self, channel: &ChannelId) -> Option<String> {
        let source = self.config.channels.get(channel)?;
        Some(format!(
            "{}/{}/releases",
            self.config.web_base_url.trim_end_matches('/'),
            source.repository
        ))
    }
}

fn newest_release(releases: Vec<GitHubRelease>) -> Option<GitHubRelease> {
    releases
        .into_iter()
        .filter(|release| !release.draft)
        .filter_map(|release| match Version::parse(&release.tag_name) {
            Ok(version) => Some((version, release)),
            Err(error) => {
                debug!("Skipping release {}: {error}", release.tag_name);
                None
            }
        })
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, release)| release)
}

fn checksum_asset(assets: &[GitHubAsset], asset_name: &str) -> Option<IntegrityRef> {
    let sidecar = format!("{asset_name}.sha256");
    assets
        .iter()
        .find(|asset| asset.name == sidecar)
        .or_else(|| {
            assets
                .iter()
                .find(|asset| CHECKSUM_FILE_NAMES.contains(&asset.name.as_str()))
        })
        .map(|asset| IntegrityRef::ChecksumFile {
            url: asset.browser_download_url.clone(),
        })
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}
