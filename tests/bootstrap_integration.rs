#![cfg(unix)]

mod common;

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Sandbox, write_script};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use ytmp3::deps::bootstrap::{Artifact, ArtifactFormat, ReleaseSources};
use ytmp3::deps::{Provenance, Tool};
use ytmp3::downloader::notify::NullNotifier;
use ytmp3::{DownloadError, Engine};

const FAKE_BINARY: &[u8] = b"#!/bin/sh\necho fake tool\n";

/// 极简 HTTP 服务，按路径返回固定内容，并统计请求次数
async fn serve(routes: HashMap<String, Vec<u8>>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let routes = Arc::new(routes);

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                counter.fetch_add(1, Ordering::SeqCst);

                let (status, body) = match routes.get(&path) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", b"not found".to_vec()),
                };
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), hits)
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{:02x}", b)).collect()
}

/// 下载器的发布地址与校验和中使用的文件名
fn downloader_asset(base: &str) -> (String, String) {
    let sources = ReleaseSources {
        downloader_base_url: base.to_string(),
        transcoder: None,
    };
    let artifact = sources.artifact(Tool::Downloader).unwrap();
    let (_, asset) = artifact.checksum.unwrap();
    (asset.clone(), format!("/releases/{}", asset))
}

fn engine_with_sources(sandbox: &mut Sandbox, sources: ReleaseSources) -> Engine {
    sandbox.config.release_sources = sources;
    Engine::with_notifier(sandbox.config.clone(), Arc::new(NullNotifier))
}

#[tokio::test]
async fn test_setup_downloader_verifies_and_installs() {
    let (asset, asset_path) = downloader_asset("http://placeholder/releases");
    let sums = format!("{}  yt-dlp.exe\n{}  {}\n", "0".repeat(64), sha256_hex(FAKE_BINARY), asset);
    let routes = HashMap::from([
        (asset_path, FAKE_BINARY.to_vec()),
        ("/releases/SHA2-256SUMS".to_string(), sums.into_bytes()),
    ]);
    let (base, hits) = serve(routes).await;

    let mut sandbox = Sandbox::new();
    let engine = engine_with_sources(
        &mut sandbox,
        ReleaseSources {
            downloader_base_url: format!("{}/releases", base),
            transcoder: None,
        },
    );

    let first = engine.setup_downloader().await.unwrap();
    assert_eq!(first.provenance, Provenance::Bootstrapped);
    assert_eq!(first.path, sandbox.bin_dir().join("yt-dlp"));
    assert_eq!(std::fs::read(&first.path).unwrap(), FAKE_BINARY);
    let mode = std::fs::metadata(&first.path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    let fetched = hits.load(Ordering::SeqCst);
    assert_eq!(fetched, 2);

    // 已安装时再次调用不会产生网络请求
    let second = engine.setup_downloader().await.unwrap();
    assert_eq!(second, first);
    assert_eq!(hits.load(Ordering::SeqCst), fetched);
    assert!(engine.check_required_dependencies().await.downloader_present);

    // 目录里只剩最终文件，没有临时文件
    let leftovers: Vec<_> = std::fs::read_dir(sandbox.bin_dir()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_nothing_behind() {
    let (asset, asset_path) = downloader_asset("http://placeholder/releases");
    let sums = format!("{}  {}\n", "a".repeat(64), asset);
    let routes = HashMap::from([
        (asset_path, FAKE_BINARY.to_vec()),
        ("/releases/SHA2-256SUMS".to_string(), sums.into_bytes()),
    ]);
    let (base, _) = serve(routes).await;

    let mut sandbox = Sandbox::new();
    let engine = engine_with_sources(
        &mut sandbox,
        ReleaseSources {
            downloader_base_url: format!("{}/releases", base),
            transcoder: None,
        },
    );

    let err = engine.setup_downloader().await.unwrap_err();
    assert!(matches!(err, DownloadError::BootstrapFailed { tool: Tool::Downloader, .. }));
    assert!(err.to_string().contains("校验和"));
    assert!(!sandbox.bin_dir().join("yt-dlp").exists());
    assert!(!engine.check_required_dependencies().await.downloader_present);
}

#[tokio::test]
async fn test_setup_transcoder_unpacks_gzip() {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(FAKE_BINARY).unwrap();
    let packed = encoder.finish().unwrap();
    let (base, _) = serve(HashMap::from([("/ffmpeg-linux-x64.gz".to_string(), packed)])).await;

    let mut sandbox = Sandbox::new();
    let engine = engine_with_sources(
        &mut sandbox,
        ReleaseSources {
            downloader_base_url: common::UNREACHABLE.to_string(),
            transcoder: Some(Artifact {
                url: format!("{}/ffmpeg-linux-x64.gz", base),
                format: ArtifactFormat::Gzip,
                checksum: None,
            }),
        },
    );

    let resolved = engine.setup_transcoder().await.unwrap();
    assert_eq!(resolved.provenance, Provenance::Bootstrapped);
    assert_eq!(std::fs::read(&resolved.path).unwrap(), FAKE_BINARY);
}

#[tokio::test]
async fn test_unreachable_source_is_bootstrap_failure() {
    let sandbox = Sandbox::new();
    let engine = Engine::with_notifier(sandbox.config.clone(), Arc::new(NullNotifier));

    let err = engine.setup_downloader().await.unwrap_err();
    assert!(matches!(err, DownloadError::BootstrapFailed { .. }));
    assert!(err.suggests_setup());

    let err = engine.setup_transcoder().await.unwrap_err();
    assert!(matches!(err, DownloadError::BootstrapFailed { tool: Tool::Transcoder, .. }));
}

#[tokio::test]
async fn test_setup_is_idempotent_when_already_bootstrapped() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.bin_dir()).unwrap();
    write_script(&sandbox.bin_dir().join("yt-dlp"), "#!/bin/sh\necho 2024.08.06\n");

    // 来源不可达，只要发生网络请求就会失败
    let engine = Engine::with_notifier(sandbox.config.clone(), Arc::new(NullNotifier));
    for _ in 0..2 {
        let resolved = engine.setup_downloader().await.unwrap();
        assert_eq!(resolved.provenance, Provenance::Bootstrapped);
    }
}

#[tokio::test]
async fn test_zero_byte_placeholder_counts_as_absent() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.bin_dir()).unwrap();
    write_script(&sandbox.bin_dir().join("ffmpeg"), "");

    let engine = Engine::with_notifier(sandbox.config.clone(), Arc::new(NullNotifier));
    assert!(!engine.check_required_dependencies().await.transcoder_present);
}

#[tokio::test]
async fn test_clear_bootstrapped_tools() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.bin_dir()).unwrap();
    write_script(&sandbox.bin_dir().join("yt-dlp"), "#!/bin/sh\n");
    write_script(&sandbox.bin_dir().join("ffmpeg"), "#!/bin/sh\n");

    let engine = Engine::with_notifier(sandbox.config.clone(), Arc::new(NullNotifier));
    assert!(engine.check_required_dependencies().await.all_present());

    assert_eq!(engine.clear_bootstrapped_tools().await.unwrap(), 2);
    let presence = engine.check_required_dependencies().await;
    assert!(!presence.downloader_present);
    assert!(!presence.transcoder_present);
    assert_eq!(engine.clear_bootstrapped_tools().await.unwrap(), 0);
}
