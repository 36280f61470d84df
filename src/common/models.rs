use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::downloader::error::DownloadError;
use crate::parser::errors::ParseError;
use crate::parser::url_parser::{self, UrlKind};

// -----------------------------------------------------------------------------------------------

/// 目标 MP3 码率（kbps），只允许固定的几档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Bitrate {
    Kbps128,
    Kbps192,
    Kbps320,
}

impl Bitrate {
    pub const ALL: [Bitrate; 3] = [Bitrate::Kbps128, Bitrate::Kbps192, Bitrate::Kbps320];

    pub fn kbps(self) -> u32 {
        match self {
            Bitrate::Kbps128 => 128,
            Bitrate::Kbps192 => 192,
            Bitrate::Kbps320 => 320,
        }
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Bitrate::Kbps192
    }
}

impl TryFrom<u32> for Bitrate {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            128 => Ok(Bitrate::Kbps128),
            192 => Ok(Bitrate::Kbps192),
            320 => Ok(Bitrate::Kbps320),
            other => Err(ParseError::InvalidBitrate(other)),
        }
    }
}

impl From<Bitrate> for u32 {
    fn from(value: Bitrate) -> Self {
        value.kbps()
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k", self.kbps())
    }
}

// -----------------------------------------------------------------------------------------------

/// 一次下载请求，构造时完成格式校验，之后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    url: String,
    output_folder: PathBuf,
    bitrate: Bitrate,
    kind: UrlKind,
}

impl DownloadRequest {
    /// 校验 URL、输出目录和码率的格式。目录是否可写由编排器在启动子进程前检查。
    pub fn new(
        url: &str,
        output_folder: impl AsRef<Path>,
        bitrate: u32,
    ) -> Result<Self, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::InvalidRequest("URL 不能为空".to_string()));
        }

        let parsed = url_parser::parse_video_url(url)
            .map_err(|e| DownloadError::InvalidRequest(e.to_string()))?;
        let kind = url_parser::classify(&parsed);

        let bitrate = Bitrate::try_from(bitrate)
            .map_err(|e| DownloadError::InvalidRequest(e.to_string()))?;

        let output_folder = output_folder.as_ref();
        if !output_folder.is_absolute() {
            return Err(DownloadError::InvalidRequest(format!(
                "输出目录必须是绝对路径: {}",
                output_folder.display()
            )));
        }

        Ok(Self {
            url: url.to_string(),
            output_folder: output_folder.to_path_buf(),
            bitrate,
            kind,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn bitrate(&self) -> Bitrate {
        self.bitrate
    }

    /// 请求被接受时做出的单曲/播放列表判定
    pub fn kind(&self) -> &UrlKind {
        &self.kind
    }

    pub fn is_playlist(&self) -> bool {
        matches!(self.kind, UrlKind::Playlist { .. })
    }
}

// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub output_path: PathBuf,
    pub title: Option<String>,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistDownloadResult {
    pub output_folder: PathBuf,
    pub total_videos: usize,
    pub downloaded_videos: Vec<DownloadResult>,
}

/// 编排器的最终成功结果，变体与请求时的 URL 分类一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownloadResponse {
    Single(DownloadResult),
    Playlist(PlaylistDownloadResult),
}

impl DownloadResponse {
    /// 本次产出的全部文件，单曲时只有一个
    pub fn items(&self) -> Vec<&DownloadResult> {
        match self {
            DownloadResponse::Single(result) => vec![result],
            DownloadResponse::Playlist(playlist) => playlist.downloaded_videos.iter().collect(),
        }
    }
}

// -----------------------------------------------------------------------------------------------

/// 推送给调用方的进度事件
///
/// `current_song` 与 `total_songs` 要么同时存在（播放列表），要么同时缺失（单曲）。
/// 只能通过 [`ProgressEvent::single`] 和 [`ProgressEvent::playlist`] 构造。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub overall_progress: f64,
    pub current_song: Option<usize>,
    pub total_songs: Option<usize>,
    pub song_progress: f64,
    pub status: String,
    pub current_title: Option<String>,
}

impl ProgressEvent {
    pub fn single(song_progress: f64, status: impl Into<String>, title: Option<String>) -> Self {
        let song_progress = clamp_percent(song_progress);
        Self {
            overall_progress: song_progress,
            current_song: None,
            total_songs: None,
            song_progress,
            status: status.into(),
            current_title: title,
        }
    }

    pub fn playlist(
        current_song: usize,
        total_songs: usize,
        song_progress: f64,
        status: impl Into<String>,
        title: Option<String>,
    ) -> Self {
        let total_songs = total_songs.max(1);
        let current_song = current_song.clamp(1, total_songs);
        let song_progress = clamp_percent(song_progress);
        Self {
            overall_progress: playlist_overall(current_song, total_songs, song_progress),
            current_song: Some(current_song),
            total_songs: Some(total_songs),
            song_progress,
            status: status.into(),
            current_title: title,
        }
    }

    pub fn is_playlist(&self) -> bool {
        self.total_songs.is_some()
    }

    /// 单曲/播放列表字段是否成对出现
    pub fn is_consistent(&self) -> bool {
        self.current_song.is_some() == self.total_songs.is_some()
    }
}

/// `((current - 1) + song / 100) / total * 100`
pub fn playlist_overall(current_song: usize, total_songs: usize, song_progress: f64) -> f64 {
    if total_songs == 0 {
        return clamp_percent(song_progress);
    }
    let done = current_song.saturating_sub(1) as f64 + clamp_percent(song_progress) / 100.0;
    clamp_percent(done / total_songs as f64 * 100.0)
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_only_accepts_fixed_set() {
        for kbps in [128, 192, 320] {
            assert_eq!(Bitrate::try_from(kbps).map(u32::from).ok(), Some(kbps));
        }
        assert!(Bitrate::try_from(256).is_err());
        assert!(serde_json::from_str::<Bitrate>("64").is_err());
        assert_eq!(serde_json::to_string(&Bitrate::Kbps320).unwrap(), "320");
    }

    #[test]
    fn playlist_overall_follows_item_position() {
        assert_eq!(playlist_overall(1, 4, 0.0), 0.0);
        assert_eq!(playlist_overall(2, 4, 50.0), 37.5);
        assert_eq!(playlist_overall(4, 4, 100.0), 100.0);
    }

    #[test]
    fn single_event_mirrors_song_progress() {
        let event = ProgressEvent::single(42.5, "下载中", None);
        assert_eq!(event.overall_progress, 42.5);
        assert!(event.is_consistent());
        assert!(!event.is_playlist());
    }
}
