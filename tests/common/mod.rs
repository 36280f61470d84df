#![allow(dead_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use ytmp3::AppConfig;
use ytmp3::deps::bootstrap::{Artifact, ArtifactFormat, ReleaseSources};

/// 没有任何服务监听的地址，连接会立即被拒绝
pub const UNREACHABLE: &str = "http://127.0.0.1:9";

pub struct Sandbox {
    pub root: TempDir,
    pub out: PathBuf,
    pub fake_bin: PathBuf,
    pub config: AppConfig,
}

impl Sandbox {
    /// 所有目录都在临时目录里，PATH 指向空目录，网络来源不可达
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let fake_bin = root.path().join("fake-bin");
        let empty_path = root.path().join("empty-path");
        for dir in [&out, &fake_bin, &empty_path] {
            std::fs::create_dir_all(dir).unwrap();
        }

        let mut config = AppConfig::new(root.path().join("config"), root.path().join("data"));
        config.search_path = Some(OsString::from(&empty_path));
        config.auto_bootstrap = false;
        config.release_sources = unreachable_sources();

        Self {
            root,
            out,
            fake_bin,
            config,
        }
    }

    /// 写入假的 yt-dlp 与 ffmpeg 并通过配置指定
    pub fn with_fake_tools(mut self, downloader_body: &str) -> Self {
        let downloader = self.fake_bin.join("yt-dlp");
        let args_log = self.args_log();
        write_script(
            &downloader,
            &format!(
                r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "2024.08.06"; exit 0; fi
echo "$@" > "{log}"
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-o" ]; then out="$arg"; fi
  prev="$arg"
done
dir=$(dirname "$out")
{body}
"#,
                log = args_log.display(),
                body = downloader_body
            ),
        );

        let transcoder = self.fake_bin.join("ffmpeg");
        write_script(&transcoder, FAKE_FFMPEG);

        self.config.downloader_override = Some(downloader);
        self.config.transcoder_override = Some(transcoder);
        self
    }

    pub fn args_log(&self) -> PathBuf {
        self.fake_bin.join("args.log")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.config.bin_dir()
    }
}

pub const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then echo "ffmpeg version 6.0-fake"; exit 0; fi
for last; do :; done
case "$*" in
  *libmp3lame*) printf 'ID3converted' > "$last"; exit 0;;
esac
echo "  Duration: 00:03:30.50, start: 0.000000, bitrate: 192 kb/s" 1>&2
echo "At least one output file must be specified" 1>&2
exit 1
"#;

pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn unreachable_sources() -> ReleaseSources {
    ReleaseSources {
        downloader_base_url: format!("{}/yt-dlp", UNREACHABLE),
        transcoder: Some(Artifact {
            url: format!("{}/ffmpeg.gz", UNREACHABLE),
            format: ArtifactFormat::Gzip,
            checksum: None,
        }),
    }
}

/// 进程仍在运行，僵尸进程不算
#[cfg(target_os = "linux")]
pub fn process_running(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    let state = stat
        .rsplit(')')
        .next()
        .and_then(|rest| rest.trim_start().chars().next());
    !matches!(state, Some('Z') | Some('X') | None)
}
