use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info};

use crate::common::models::{Bitrate, DownloadResult};
use crate::downloader::error::DownloadError;
use crate::process::{CommandSpec, ProcessRunner};

lazy_static! {
    // Duration: 00:03:32.45, start: 0.000000, bitrate: 128 kb/s
    static ref DURATION: Regex = Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap();
}

/// 把标题转换成可用的文件名
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced.trim().trim_end_matches(['.', ' ']).to_string()
}

/// 用转码器读取媒体时长，任何失败都返回 `None`
pub async fn probe_duration(runner: &ProcessRunner, transcoder: &Path, media: &Path) -> Option<f64> {
    let spec = CommandSpec::new(transcoder)
        .arg("-hide_banner")
        .arg("-i")
        .arg(media.as_os_str());

    // 没有指定输出时 ffmpeg 总是以非零码退出，这里只关心输出内容
    let mut process = runner.spawn(&spec).ok()?;
    let mut duration = None;
    while let Some(line) = process.next_line().await {
        if duration.is_none() {
            duration = parse_duration(&line.text);
        }
    }
    let _ = process.wait().await;

    debug!("{:?} 的时长: {:?}", media, duration);
    duration
}

pub fn parse_duration(line: &str) -> Option<f64> {
    let caps = DURATION.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// 直接调用转码器把本地文件转成 MP3
pub async fn convert_to_mp3(
    runner: &ProcessRunner,
    transcoder: &Path,
    input: &Path,
    output_folder: &Path,
    bitrate: Bitrate,
) -> Result<DownloadResult, DownloadError> {
    let input_meta = tokio::fs::metadata(input).await;
    if !input_meta.is_ok_and(|meta| meta.is_file()) {
        return Err(DownloadError::InvalidRequest(format!(
            "输入文件不存在: {}",
            input.display()
        )));
    }
    let folder_meta = tokio::fs::metadata(output_folder).await;
    if !folder_meta.is_ok_and(|meta| meta.is_dir()) {
        return Err(DownloadError::InvalidRequest(format!(
            "输出目录不存在: {}",
            output_folder.display()
        )));
    }

    let title = input
        .file_stem()
        .and_then(|s| s.to_str())
        .map(sanitize_filename)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_string());
    let output_path: PathBuf = output_folder.join(format!("{}.mp3", title));
    if output_path == input {
        return Err(DownloadError::InvalidRequest(
            "输出文件与输入文件相同".to_string(),
        ));
    }

    debug!("开始转换 {:?} -> {:?}", input, output_path);
    let spec = CommandSpec::new(transcoder)
        .arg("-i")
        .arg(input.as_os_str())
        .args(["-vn", "-acodec", "libmp3lame", "-ab"])
        .arg(format!("{}k", bitrate.kbps()))
        .args(["-ar", "44100", "-y"])
        .arg(output_path.as_os_str());

    let exit = runner.run_to_completion(&spec).await?;
    if !exit.success {
        error!("❌ ffmpeg 转换失败，错误日志如下：\n{}", exit.tail_text());
        return Err(DownloadError::ToolExecutionFailed {
            code: exit.code,
            tail: exit.tail_text(),
        });
    }

    let metadata = tokio::fs::metadata(&output_path)
        .await
        .map_err(|e| DownloadError::output("转换完成但无法读取输出文件", e))?;
    let duration_seconds = probe_duration(runner, transcoder, &output_path).await;

    info!("✅ 转换完成，输出文件: {:?}", output_path);
    Ok(DownloadResult {
        output_path,
        title: Some(title),
        duration_seconds,
        file_size_bytes: Some(metadata.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_reserved_characters() {
        assert_eq!(sanitize_filename("AC/DC: Back in Black?"), "AC_DC_ Back in Black_");
        assert_eq!(sanitize_filename("  trailing dots... "), "trailing dots");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn parses_ffmpeg_duration() {
        let line = "  Duration: 01:02:03.50, start: 0.000000, bitrate: 192 kb/s";
        assert_eq!(parse_duration(line), Some(3723.5));
        assert_eq!(parse_duration("Duration: N/A, bitrate: N/A"), None);
    }
}
