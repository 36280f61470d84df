//! 下载器退出后确定最终产物并补全元数据

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::models::DownloadResult;
use crate::parser::progress::ParseContext;
use crate::post_process::transcode::{probe_duration, sanitize_filename};
use crate::process::ProcessRunner;

use super::error::DownloadError;

/// 输出目录中已有的 .mp3 文件
pub async fn snapshot_mp3s(folder: &Path) -> std::io::Result<HashSet<PathBuf>> {
    let mut found = HashSet::new();
    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_mp3(&path) && entry.file_type().await?.is_file() {
            found.insert(path);
        }
    }
    Ok(found)
}

/// 确定本次下载产出的文件，依次尝试：
/// 下载器报告的路径、按标题推算的路径、与下载前快照对比得到的新文件
pub async fn collect_outputs(
    ctx: &ParseContext,
    folder: &Path,
    snapshot: Option<&HashSet<PathBuf>>,
) -> Result<Vec<PathBuf>, DownloadError> {
    let mut reported = Vec::new();
    for path in ctx.outputs() {
        let path = if path.is_absolute() {
            path.clone()
        } else {
            folder.join(path)
        };
        if is_file(&path).await {
            reported.push(path);
        }
    }
    if !reported.is_empty() {
        return Ok(reported);
    }

    if let Some(title) = ctx.current_title() {
        let guessed = folder.join(format!("{}.mp3", sanitize_filename(title)));
        if is_file(&guessed).await {
            debug!("按标题推算出输出文件: {:?}", guessed);
            return Ok(vec![guessed]);
        }
    }

    if let Some(before) = snapshot {
        let mut fresh: Vec<PathBuf> = snapshot_mp3s(folder)
            .await
            .map_err(|e| DownloadError::output("无法读取输出目录", e))?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();
        fresh.sort();
        if !fresh.is_empty() {
            debug!("通过目录快照找到 {} 个新文件", fresh.len());
        }
        return Ok(fresh);
    }

    Ok(Vec::new())
}

/// 读取文件大小和时长。时长是尽力而为，大小读不到视为输出错误。
pub async fn describe(
    path: &Path,
    runner: &ProcessRunner,
    transcoder: &Path,
) -> Result<DownloadResult, DownloadError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| DownloadError::output(&format!("无法读取 {}", path.display()), e))?;

    let duration_seconds = probe_duration(runner, transcoder, path).await;
    if duration_seconds.is_none() {
        warn!("无法获取时长: {:?}", path);
    }

    Ok(DownloadResult {
        output_path: path.to_path_buf(),
        title: path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string),
        duration_seconds,
        file_size_bytes: Some(metadata.len()),
    })
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::progress::{parse_line, ParseMode};

    #[tokio::test]
    async fn falls_back_to_snapshot_difference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.mp3"), b"x").unwrap();
        let before = snapshot_mp3s(dir.path()).await.unwrap();

        std::fs::write(dir.path().join("new.mp3"), b"y").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"z").unwrap();

        let ctx = ParseContext::new(ParseMode::Playlist);
        let outputs = collect_outputs(&ctx, dir.path(), Some(&before)).await.unwrap();
        assert_eq!(outputs, vec![dir.path().join("new.mp3")]);
    }

    #[tokio::test]
    async fn reported_paths_win_over_guesses() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("Song.mp3");
        std::fs::write(&song, b"x").unwrap();

        let mut ctx = ParseContext::new(ParseMode::Single);
        parse_line(&format!("[ExtractAudio] Destination: {}", song.display()), &mut ctx);
        let outputs = collect_outputs(&ctx, dir.path(), None).await.unwrap();
        assert_eq!(outputs, vec![song]);
    }

    #[tokio::test]
    async fn reported_path_must_exist_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ParseContext::new(ParseMode::Single);
        parse_line(
            &format!("[ExtractAudio] Destination: {}", dir.path().join("Gone.mp3").display()),
            &mut ctx,
        );
        assert!(collect_outputs(&ctx, dir.path(), None).await.unwrap().is_empty());

        std::fs::write(dir.path().join("Gone.mp3"), b"x").unwrap();
        let outputs = collect_outputs(&ctx, dir.path(), None).await.unwrap();
        assert_eq!(outputs, vec![dir.path().join("Gone.mp3")]);
    }
}
