use std::io::Read;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::release::IntegrityRef;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("no integrity reference for {asset}; refusing to install an unverified update")]
    Unavailable { asset: String },
    #[error("failed to fetch checksums for {asset}: {details}")]
    ChecksumFetch { asset: String, details: String },
    #[error("no checksum entry found for '{asset}' in checksums file")]
    MissingEntry { asset: String },
    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    Mismatch {
        asset: String,
        expected: String,
        actual: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// External check run on a downloaded artifact before anything is installed.
/// An `Err` always blocks the install.
#[async_trait]
pub trait ArtifactVerifier: Send + Sync {
    async fn verify(
        &self,
        artifact: &Path,
        asset_name: &str,
        reference: Option<&IntegrityRef>,
    ) -> Result<(), VerificationError>;
}

/// Verifies SHA-256 digests, either published inline or in a `sha256sum`
/// style checksums file.
pub struct Sha256Verifier {
    client: reqwest::Client,
}

impl Sha256Verifier {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Verifier with a dedicated client for fetching checksum files.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn with_timeout(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self::new(client))
    }

    async fn expected_from_file(
        &self,
        url: &str,
        asset_name: &str,
    ) -> Result<String, VerificationError> {
        let fetch_failed = |details: String| VerificationError::ChecksumFetch {
            asset: asset_name.to_string(),
            details,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| fetch_failed(error.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_failed(format!("HTTP {}", response.status())));
        }
        let checksums = response
            .text()
            .await
            .map_err(|error| fetch_failed(error.to_string()))?;

        parse_expected_checksum(&checksums, asset_name).ok_or_else(|| {
            VerificationError::MissingEntry {
                asset: asset_name.to_string(),
            }
        })
    }
}

#[async_trait]
impl ArtifactVerifier for Sha256Verifier {
    async fn verify(
        &self,
        artifact: &Path,
        asset_name: &str,
        reference: Option<&IntegrityRef>,
    ) -> Result<(), VerificationError> {
        let expected = match reference {
            Some(IntegrityRef::Sha256(digest)) => digest.clone(),
            Some(IntegrityRef::ChecksumFile { url }) => {
                self.expected_from_file(url, asset_name).await?
            }
            None => {
                return Err(VerificationError::Unavailable {
                    asset: asset_name.to_string(),
                });
            }
        };

        let actual = sha256_file(artifact)?;
        if actual.eq_ignore_ascii_case(&expected) {
            info!("Update checksum verified for {asset_name}");
            Ok(())
        } else {
            Err(VerificationError::Mismatch {
                asset: asset_name.to_string(),
                expected: expected.to_ascii_lowercase(),
                actual,
            })
        }
    }
}

fn parse_expected_checksum(checksums: &str, asset_name: &str) -> Option<String> {
    checksums.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts
            .next()
            .map(|name| name.trim_start_matches('*').trim_start_matches("./"));
        match name {
            Some(name) if name == asset_name => Some(hash.to_ascii_lowercase()),
            // A `<asset>.sha256` sidecar holds just the digest.
            None if hash.len() == 64 && hash.chars().all(|ch| ch.is_ascii_hexdigit()) => {
                Some(hash.to_ascii_lowercase())
            }
            _ => None,
        }
    })
}

pub(crate) fn sha256_file(path: &Path) -> Result<String, VerificationError> {
    let io_error = |context: &'static str, error: &std::io::Error| VerificationError::Io {
        context,
        source: std::io::Error::new(error.kind(), format!("{}: {error}", path.display())),
    };
    let mut file = std::fs::File::open(path)
        .map_err(|error| io_error("failed to open file for checksum", &error))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| io_error("failed to read file for checksum", &error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const BARE_DIGEST: &str = "e9c8e8b5ad7b1e8ba1b2d06ee5eaf29bd09f8bc5b5cba4c2c8cd5c40b0e0dfa8";

    fn payload(dir: &Path) -> std::path::PathBuf {
        let file = dir.join("DockLock-macos.zip");
        std::fs::write(&file, b"docklock").expect("payload should be written");
        file
    }

    fn payload_digest(file: &Path) -> String {
        sha256_file(file).expect("checksum should be computed")
    }

    #[test]
    fn sha256_file_returns_known_digest() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let file_path = temp.path().join("payload.bin");
        std::fs::write(&file_path, b"dock").expect("payload file should be written");

        assert_eq!(
            payload_digest(&file_path),
            "a864ed013d128c9c908c18a4c1c8e87198e50c1a65c531f4eb1aee81425a79fd"
        );
    }

    #[test]
    fn parse_expected_checksum_matches_asset_name_or_bare_digest() {
        let checksums = "\
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa  foo.zip
BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB *./bar.zip
";
        assert_eq!(
            parse_expected_checksum(checksums, "bar.zip").as_deref(),
            Some("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb")
        );
        assert_eq!(parse_expected_checksum(checksums, "baz.zip"), None);
        assert_eq!(
            parse_expected_checksum(BARE_DIGEST, "anything.zip").as_deref(),
            Some(BARE_DIGEST)
        );
    }

    #[tokio::test]
    async fn inline_digest_must_match() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let file = payload(temp.path());
        let verifier = Sha256Verifier::new(reqwest::Client::new());

        let good = IntegrityRef::Sha256(payload_digest(&file).to_ascii_uppercase());
        verifier
            .verify(&file, "DockLock-macos.zip", Some(&good))
            .await
            .expect("matching digest should verify");

        let bad = IntegrityRef::Sha256("0".repeat(64));
        let error = verifier
            .verify(&file, "DockLock-macos.zip", Some(&bad))
            .await
            .expect_err("mismatched digest should fail");
        assert!(matches!(error, VerificationError::Mismatch { .. }));
    }

    #[tokio::test]
    async fn missing_reference_refuses_install() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let file = payload(temp.path());

        let error = Sha256Verifier::new(reqwest::Client::new())
            .verify(&file, "DockLock-macos.zip", None)
            .await
            .expect_err("unverifiable artifact should fail");

        assert!(matches!(error, VerificationError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn checksum_file_is_downloaded_and_matched_by_name() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let file = payload(temp.path());
        let digest = payload_digest(&file);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/SHA256SUMS"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "{}  other.zip\n{digest}  DockLock-macos.zip\n",
                "1".repeat(64)
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let verifier = Sha256Verifier::new(reqwest::Client::new());
        let reference = IntegrityRef::ChecksumFile {
            url: format!("{}/SHA256SUMS", server.uri()),
        };
        verifier
            .verify(&file, "DockLock-macos.zip", Some(&reference))
            .await
            .expect("checksum file entry should verify");

        let error = verifier
            .verify(&file, "DockLock-beta.zip", Some(&reference))
            .await
            .expect_err("unlisted asset should fail");
        assert!(matches!(error, VerificationError::MissingEntry { .. }));

        let unreachable = IntegrityRef::ChecksumFile {
            url: format!("{}/missing", server.uri()),
        };
        let error = verifier
            .verify(&file, "DockLock-macos.zip", Some(&unreachable))
            .await
            .expect_err("missing checksum file should fail");
        assert!(matches!(error, VerificationError::ChecksumFetch { .. }));
    }
}
