#![cfg(unix)]

mod common;

use std::process::{Command, Output};

use common::Sandbox;
use ytmp3::{HistoryEntry, Preferences};

const SINGLE_RUN: &str = r#"
echo "[download] Destination: $dir/Cli Song.webm"
echo "[download]  50.0% of 1.00MiB at 1.00MiB/s ETA 00:01"
echo "[download] 100% of 1.00MiB in 00:00:01 at 1.00MiB/s"
echo "[ExtractAudio] Destination: $dir/Cli Song.mp3"
printf 'ID3' > "$dir/Cli Song.mp3"
"#;

fn ytmp3(sandbox: &Sandbox, args: &[&str]) -> Output {
    let config = &sandbox.config;
    let mut command = Command::new(env!("CARGO_BIN_EXE_ytmp3"));
    command
        .args(args)
        .arg("--no-bootstrap")
        .env("YTMP3_CONFIG_DIR", &config.config_dir)
        .env("YTMP3_DATA_DIR", &config.data_dir);
    if let Some(path) = &config.downloader_override {
        command.env("YTDLP_PATH", path);
    }
    if let Some(path) = &config.transcoder_override {
        command.env("FFMPEG_PATH", path);
    }
    command.output().unwrap()
}

#[test]
fn test_download_saves_preferences_for_next_run() {
    let sandbox = Sandbox::new().with_fake_tools(SINGLE_RUN);
    let out = sandbox.out.display().to_string();

    let first = ytmp3(
        &sandbox,
        &["download", "--url", "https://youtu.be/abc123", "--output-dir", &out, "--bitrate", "320"],
    );
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(sandbox.out.join("Cli Song.mp3").is_file());

    let raw = std::fs::read_to_string(sandbox.config.preferences_path()).unwrap();
    let prefs: Preferences = serde_json::from_str(&raw).unwrap();
    assert_eq!(prefs.output_folder.as_deref(), Some(sandbox.out.as_path()));
    assert_eq!(prefs.bitrate.map(|b| b.kbps()), Some(320));
    assert_eq!(prefs.last_url.as_deref(), Some("https://youtu.be/abc123"));

    // 不带参数时沿用上次保存的设置
    let second = ytmp3(&sandbox, &["download"]);
    assert!(second.status.success(), "{}", String::from_utf8_lossy(&second.stderr));

    let raw = std::fs::read_to_string(sandbox.config.history_path()).unwrap();
    let history: Vec<HistoryEntry> = serde_json::from_str(&raw).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.bitrate.kbps() == 320));
}

#[test]
fn test_download_without_url_fails() {
    let sandbox = Sandbox::new().with_fake_tools(SINGLE_RUN);
    let out = sandbox.out.display().to_string();

    let output = ytmp3(&sandbox, &["download", "--output-dir", &out]);
    assert!(!output.status.success());
    assert!(!sandbox.args_log().exists());
}
