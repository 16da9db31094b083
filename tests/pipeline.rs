//! End-to-end pipeline tests against a local mock index.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use sha2::{Digest, Sha512};
use sdkenv::types::Stage;
use sdkenv::ui::Reporter;
use sdkenv::{EnvConfig, EnvManager, EnvError, EnvVersion};

/// Reporter that records progress and can trigger a cancellation once a
/// threshold is crossed.
#[derive(Default)]
struct TestReporter {
    progress: Mutex<Vec<u8>>,
    stages: Mutex<Vec<Stage>>,
    cancel_at: Option<u8>,
    manager: OnceLock<(EnvManager, EnvVersion)>,
}

/// Shared handle the manager can own while the test keeps inspecting the
/// recorder behind it.
struct ReporterHandle(Arc<TestReporter>);

impl Reporter for ReporterHandle {
    fn stage(&self, _version: &EnvVersion, stage: Stage) {
        self.0.stages.lock().unwrap().push(stage);
    }

    fn progress(&self, _version: &EnvVersion, percent: u8) {
        self.0.progress.lock().unwrap().push(percent);
        if let (Some(threshold), Some((mgr, version))) = (self.0.cancel_at, self.0.manager.get()) {
            if percent >= threshold {
                mgr.cancel(version);
            }
        }
    }

    fn sync_update(&self, _version: &EnvVersion, _name: &str) {}
    fn done(&self, _version: &EnvVersion, _detail: &str) {}
    fn failed(&self, _version: &EnvVersion, _reason: &str) {}
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
}

/// A zip archive with the completed-install marker plus `extra` payload
/// files, so extraction produces several progress ticks.
fn make_archive(extra: usize) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer.add_directory("ncsmgr/", options).unwrap();
    writer.start_file("ncsmgr/manifest.env", options).unwrap();
    writer.write_all(b"NCS_VERSION=test\n").unwrap();
    for i in 0..extra {
        writer.start_file(format!("bin/tool-{i}"), options).unwrap();
        writer.write_all(format!("payload {i}").as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

struct Fixture {
    _server: mockito::ServerGuard,
    root: tempfile::TempDir,
    archive_mock: mockito::Mock,
    manager: EnvManager,
    reporter: Arc<TestReporter>,
    version: EnvVersion,
}

/// Serve an index with one environment plus its archive, and build a
/// manager pointed at it. `west` is replaced with `true` so the sync
/// stage succeeds without a real workspace tool.
async fn fixture(archive: &[u8], advertised_sha512: &str, cancel_at: Option<u8>) -> Fixture {
    let mut server = mockito::Server::new_async().await;
    let index = format!(
        r#"[{{"version":"v2.6.0","toolchains":[
            {{"name":"toolchain-v2.6.0.zip","version":"2.6.0","sha512":"{advertised_sha512}"}}
        ]}}]"#
    );
    server
        .mock("GET", "/index.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(index)
        .create_async()
        .await;
    let archive_mock = server
        .mock("GET", "/toolchain-v2.6.0.zip")
        .with_status(200)
        .with_body(archive)
        .create_async()
        .await;

    let root = tempfile::tempdir().unwrap();
    let mut config = EnvConfig::new(root.path(), format!("{}/index.json", server.url()));
    config.west_program = "true".into();

    let reporter = Arc::new(TestReporter {
        cancel_at,
        ..TestReporter::default()
    });
    let manager = EnvManager::with_reporter(config, Box::new(ReporterHandle(reporter.clone())));
    let version = EnvVersion::new("v2.6.0");
    reporter
        .manager
        .set((manager.clone(), version.clone()))
        .ok()
        .unwrap();

    Fixture {
        _server: server,
        root,
        archive_mock,
        manager,
        reporter,
        version,
    }
}

#[tokio::test]
async fn test_install_end_to_end() {
    let archive = make_archive(4);
    let digest = sha512_hex(&archive);
    let fx = fixture(&archive, &digest, None).await;

    fx.manager.refresh_index().await.unwrap();
    fx.manager.install(&fx.version, &|_: &Path| false).await.unwrap();

    let env = fx.manager.environment(&fx.version).unwrap();
    assert!(env.is_installed());
    assert!(!env.is_busy());

    let tc_dir = env.toolchain_dir.as_ref().unwrap();
    assert!(tc_dir.ends_with("v2.6.0/toolchain"));
    assert!(tc_dir.join("ncsmgr/manifest.env").is_file());
    assert!(tc_dir.join("bin/tool-0").is_file());

    // Download owns 0-50, unpack 50-100; the overall scale is monotonic
    // and finishes at 100.
    let progress = fx.reporter.progress.lock().unwrap();
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!(progress.contains(&50));
    assert_eq!(progress.last(), Some(&100));

    let stages = fx.reporter.stages.lock().unwrap();
    assert_eq!(&*stages, &[Stage::Downloading, Stage::Installing]);
}

#[tokio::test]
async fn test_checksum_mismatch_fails_and_deletes_archive() {
    let archive = make_archive(2);
    let wrong = sha512_hex(b"something else entirely");
    let fx = fixture(&archive, &wrong, None).await;

    fx.manager.refresh_index().await.unwrap();
    let err = fx
        .manager
        .install(&fx.version, &|_: &Path| false)
        .await
        .unwrap_err();
    assert!(matches!(err, EnvError::ChecksumMismatch { .. }));

    let env = fx.manager.environment(&fx.version).unwrap();
    assert!(!env.is_installed());
    assert!(!env.is_busy());

    // A corrupt download never survives to poison a retry.
    let cached = fx
        .root
        .path()
        .join("downloads/toolchain-v2.6.0.zip");
    assert!(!cached.exists());
}

#[tokio::test]
async fn test_cancel_mid_unpack_rolls_back() {
    // Enough entries for per-entry progress ticks in the 50-100 range.
    let archive = make_archive(20);
    let digest = sha512_hex(&archive);
    // Trigger cancellation once unpack is well underway.
    let fx = fixture(&archive, &digest, Some(85)).await;

    fx.manager.refresh_index().await.unwrap();
    // Cancellation is a success path, not an error.
    fx.manager.install(&fx.version, &|_: &Path| false).await.unwrap();

    let env = fx.manager.environment(&fx.version).unwrap();
    assert!(!env.is_installed());
    assert!(!env.is_busy());
    assert!(env.progress.is_none());
    assert!(env.stage.is_none());

    // The partial tree is rolled back to "never installed".
    assert!(!fx.root.path().join("v2.6.0").exists());
}

#[tokio::test]
async fn test_second_download_reuses_cached_archive() {
    let archive = make_archive(2);
    let digest = sha512_hex(&archive);
    let fx = fixture(&archive, &digest, None).await;

    fx.manager.refresh_index().await.unwrap();
    fx.manager.install(&fx.version, &|_: &Path| false).await.unwrap();
    fx.manager.remove(&fx.version).await.unwrap();

    let env = fx.manager.environment(&fx.version).unwrap();
    assert!(!env.is_installed());
    assert!(fx
        .root
        .path()
        .join("downloads/toolchain-v2.6.0.zip")
        .is_file());

    fx.manager.install(&fx.version, &|_: &Path| false).await.unwrap();
    assert!(fx.manager.environment(&fx.version).unwrap().is_installed());

    // The cached, checksum-valid archive was reused: exactly one fetch.
    fx.archive_mock.assert_async().await;
}

#[tokio::test]
async fn test_update_runs_full_pipeline_again() {
    let archive = make_archive(3);
    let digest = sha512_hex(&archive);
    let fx = fixture(&archive, &digest, None).await;

    fx.manager.refresh_index().await.unwrap();
    fx.manager.install(&fx.version, &|_: &Path| false).await.unwrap();
    fx.manager
        .update_toolchain(&fx.version, &|_: &Path| false)
        .await
        .unwrap();

    let env = fx.manager.environment(&fx.version).unwrap();
    assert!(env.is_installed());
    assert!(!env.is_busy());

    // Same pipeline both times, so the cached archive served the update.
    fx.archive_mock.assert_async().await;
}

#[tokio::test]
async fn test_remove_drops_entity_only_when_unknown_remotely() {
    let archive = make_archive(1);
    let digest = sha512_hex(&archive);
    let fx = fixture(&archive, &digest, None).await;

    fx.manager.refresh_index().await.unwrap();
    fx.manager.install(&fx.version, &|_: &Path| false).await.unwrap();

    // Known remotely: removal reverts to "available".
    fx.manager.remove(&fx.version).await.unwrap();
    let env = fx.manager.environment(&fx.version).unwrap();
    assert!(env.toolchain_dir.is_none());
    assert!(!env.toolchains.is_empty());
    assert!(!fx.root.path().join("v2.6.0").exists());
}

#[tokio::test]
async fn test_discovery_picks_up_existing_install() {
    let root = tempfile::tempdir().unwrap();
    let env_dir = root.path().join("v2.4.2");
    std::fs::create_dir_all(env_dir.join("toolchain/ncsmgr")).unwrap();
    std::fs::write(env_dir.join("toolchain/ncsmgr/manifest.env"), "").unwrap();
    std::fs::create_dir_all(env_dir.join(".west")).unwrap();
    std::fs::write(env_dir.join(".west/config"), "[manifest]").unwrap();

    let config = EnvConfig::new(root.path(), "http://localhost/index.json");
    let manager = EnvManager::new(config);
    manager.discover_local().unwrap();

    let env = manager.environment(&EnvVersion::new("v2.4.2")).unwrap();
    assert!(env.is_installed());
    assert!(env.west_present);

    // A locally-known environment with no remote descriptors disappears
    // from the registry entirely on removal.
    manager.remove(&EnvVersion::new("v2.4.2")).await.unwrap();
    assert!(manager.environment(&EnvVersion::new("v2.4.2")).is_none());
}
