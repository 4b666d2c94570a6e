use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docklock_core::{
    BundleInstaller, ChannelId, ErrorKind, GitHubReleaseSource, GitHubSourceConfig,
    InstallTarget, InstallerConfig, Sha256Verifier, StateName, UpdateEvent, UpdateState, Updater,
    UpdaterConfig, UpdaterHandle, Version,
};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ASSET: &str = "DockLock-1.1.0-test.zip";

fn bundle_zip(marker: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer
        .start_file("DockLock.app/Contents/MacOS/DockLock", options)
        .expect("file entry should be started");
    writer.write_all(marker).expect("file entry should be written");
    writer
        .finish()
        .expect("zip archive should be finalized")
        .into_inner()
}

fn install_old_bundle(root: &Path) -> PathBuf {
    let bundle = root.join("Applications/DockLock.app");
    std::fs::create_dir_all(bundle.join("Contents/MacOS")).expect("bundle should be created");
    std::fs::write(bundle.join("Contents/MacOS/DockLock"), b"1.0.0")
        .expect("binary should be written");
    bundle
}

async fn github(digest: &str, archive: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "tag_name": "v1.1.0",
        "name": "DockLock 1.1.0",
        "html_url": "https://github.com/acme/docklock/releases/tag/v1.1.0",
        "body": "Faster dock switching",
        "draft": false,
        "published_at": "2026-10-01T12:00:00Z",
        "assets": [{
            "name": ASSET,
            "browser_download_url": format!("{}/download/{ASSET}", server.uri()),
            "size": archive.len(),
            "digest": format!("sha256:{digest}"),
        }],
    });
    Mock::given(method("GET"))
        .and(path("/repos/acme/docklock/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/download/{ASSET}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(&server)
        .await;
    server
}

fn updater(server: &MockServer, root: &Path, bundle: &Path) -> UpdaterHandle {
    let mut source_config = GitHubSourceConfig::new("docklock-tests").with_channel(
        ChannelId::stable(),
        "acme/docklock",
        false,
    );
    source_config.api_base_url = server.uri();
    source_config.asset_suffix = "-test.zip".to_string();
    let source = GitHubReleaseSource::new(source_config).expect("source should build");

    let mut installer_config = InstallerConfig::new(root.join("updates"), "docklock-tests");
    installer_config.target = InstallTarget::Path(bundle.to_path_buf());
    let verifier = Sha256Verifier::with_timeout(Duration::from_secs(5), "docklock-tests")
        .expect("verifier should build");
    let installer = BundleInstaller::new(installer_config, Arc::new(verifier))
        .expect("installer should build");

    let mut config = UpdaterConfig::new(
        Version::parse("1.0.0").expect("running version should parse"),
        ChannelId::stable(),
    );
    config.retry_delays = vec![Duration::ZERO];
    Updater::spawn(config, Arc::new(source), Arc::new(installer))
}

fn state_names(handle: &UpdaterHandle) -> mpsc::UnboundedReceiver<UpdateState> {
    let (tx, rx) = mpsc::unbounded_channel();
    handle.subscribe(move |event| {
        if let UpdateEvent::StateChanged { state, .. } = event {
            let _ = tx.send(state.clone());
        }
    });
    rx
}

async fn next(states: &mut mpsc::UnboundedReceiver<UpdateState>) -> UpdateState {
    tokio::time::timeout(Duration::from_secs(10), states.recv())
        .await
        .expect("transition should arrive in time")
        .expect("subscription should stay open")
}

#[tokio::test]
async fn newer_release_is_found_verified_and_installed() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let bundle = install_old_bundle(temp.path());
    let archive = bundle_zip(b"1.1.0");
    let digest = format!("{:x}", Sha256::digest(&archive));
    let server = github(&digest, archive).await;

    let handle = updater(&server, temp.path(), &bundle);
    let mut states = state_names(&handle);

    handle
        .check_for_updates(true)
        .await
        .expect("check should be queued");
    assert_eq!(next(&mut states).await.name(), StateName::Checking);
    let available = next(&mut states).await;
    let release = available
        .pending_release()
        .expect("newer release should be pending")
        .clone();
    assert_eq!(release.version.to_string(), "1.1.0");
    assert_eq!(release.notes.as_deref(), Some("Faster dock switching"));
    assert_eq!(
        handle.pending_update_title().as_deref(),
        Ok("DockLock 1.1.0")
    );

    handle
        .install_pending_update(true)
        .await
        .expect("install should start");
    assert_eq!(next(&mut states).await.name(), StateName::Installing);
    assert_eq!(next(&mut states).await, UpdateState::Restarting(release));

    let installed = std::fs::read(bundle.join("Contents/MacOS/DockLock"))
        .expect("installed binary should be readable");
    assert_eq!(installed, b"1.1.0");
}

#[tokio::test]
async fn tampered_download_is_never_installed() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let bundle = install_old_bundle(temp.path());
    let published = format!("{:x}", Sha256::digest(bundle_zip(b"1.1.0")));
    let server = github(&published, bundle_zip(b"tampered")).await;

    let handle = updater(&server, temp.path(), &bundle);
    let mut states = state_names(&handle);

    handle
        .check_for_updates(false)
        .await
        .expect("check should be queued");
    next(&mut states).await;
    next(&mut states).await;

    handle
        .install_pending_update(false)
        .await
        .expect("install should start");
    assert_eq!(next(&mut states).await.name(), StateName::Installing);
    let failed = next(&mut states).await;

    assert_eq!(failed.name(), StateName::InstallFailed);
    assert_eq!(
        failed.failure().map(|failure| failure.kind),
        Some(ErrorKind::Verification)
    );
    assert!(handle.has_pending_update());
    let untouched = std::fs::read(bundle.join("Contents/MacOS/DockLock"))
        .expect("installed binary should be readable");
    assert_eq!(untouched, b"1.0.0");
}
