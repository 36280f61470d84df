//! 下载器输出的进度解析
//!
//! 外部下载器的输出是半结构化文本，这里是整个引擎唯一做文本匹配的地方，
//! 下载器输出格式变化时只需要改这个文件。

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::common::models::ProgressEvent;

pub const STATUS_STARTING: &str = "开始下载";
pub const STATUS_DOWNLOADING: &str = "正在下载";
pub const STATUS_CONVERTING: &str = "正在转换为 MP3";
pub const STATUS_COMPLETE: &str = "下载完成";

lazy_static! {
    // [download] Downloading item 2 of 10（旧版本为 video）
    static ref ITEM_BANNER: Regex =
        Regex::new(r"^\[download\]\s+Downloading (?:item|video) (\d+) of (\d+)").unwrap();
    // [download]  42.3% of 3.21MiB at 1.20MiB/s ETA 00:02
    static ref PERCENT: Regex = Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").unwrap();
    // [download] Destination: /out/Title.webm
    static ref DOWNLOAD_DEST: Regex = Regex::new(r"^\[download\]\s+Destination:\s*(.+)$").unwrap();
    // [download] /out/Title.mp3 has already been downloaded
    static ref ALREADY_DONE: Regex =
        Regex::new(r"^\[download\]\s+(.+?) has already been downloaded").unwrap();
    // [ExtractAudio] Destination: /out/Title.mp3
    static ref AUDIO_DEST: Regex = Regex::new(r"^\[ExtractAudio\]\s+Destination:\s*(.+)$").unwrap();
    // [ExtractAudio] Not converting audio /out/Title.mp3; file is already in target format mp3
    static ref AUDIO_SKIPPED: Regex =
        Regex::new(r"^\[ExtractAudio\]\s+Not converting audio (.+?); file is already in target format").unwrap();
    static ref POST_PROCESS: Regex =
        Regex::new(r"^\[(ExtractAudio|Merger|FixupM4a|Metadata|EmbedThumbnail|VideoConvertor)\]").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Single,
    Playlist,
}

/// 解析一次下载过程所需的累积状态
#[derive(Debug, Clone)]
pub struct ParseContext {
    mode: ParseMode,
    current_song: Option<usize>,
    total_songs: Option<usize>,
    song_progress: f64,
    status: String,
    current_title: Option<String>,
    outputs: Vec<PathBuf>,
}

impl ParseContext {
    pub fn new(mode: ParseMode) -> Self {
        Self {
            mode,
            current_song: None,
            total_songs: None,
            song_progress: 0.0,
            status: STATUS_STARTING.to_string(),
            current_title: None,
            outputs: Vec::new(),
        }
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    pub fn total_songs(&self) -> Option<usize> {
        self.total_songs
    }

    pub fn current_title(&self) -> Option<&str> {
        self.current_title.as_deref()
    }

    /// 下载器报告的最终输出文件，按出现顺序去重
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    fn record_output(&mut self, path: &str) {
        let path = PathBuf::from(path.trim().trim_matches('"'));
        self.current_title = title_from_path(&path).or(self.current_title.take());
        if !self.outputs.contains(&path) {
            self.outputs.push(path);
        }
    }

    fn event(&self) -> Option<ProgressEvent> {
        match self.mode {
            ParseMode::Single => Some(ProgressEvent::single(
                self.song_progress,
                self.status.clone(),
                self.current_title.clone(),
            )),
            // 播放列表在第一条条目横幅之前没有条目序号，不产生事件
            ParseMode::Playlist => {
                let (current, total) = (self.current_song?, self.total_songs?);
                Some(ProgressEvent::playlist(
                    current,
                    total,
                    self.song_progress,
                    self.status.clone(),
                    self.current_title.clone(),
                ))
            }
        }
    }
}

/// 解析一行输出。无法识别的行返回 `None`，从不报错。
pub fn parse_line(line: &str, ctx: &mut ParseContext) -> Option<ProgressEvent> {
    let line = line.trim_matches(|c: char| c == '\r' || c == '\n').trim();
    if line.is_empty() {
        return None;
    }

    if let Some(caps) = ITEM_BANNER.captures(line) {
        let current = caps[1].parse::<usize>().ok()?;
        let total = caps[2].parse::<usize>().ok()?;
        if ctx.mode != ParseMode::Playlist || current == 0 || total == 0 || current > total {
            debug!("忽略条目横幅: {}", line);
            return None;
        }
        ctx.current_song = Some(current);
        ctx.total_songs = Some(total);
        ctx.song_progress = 0.0;
        ctx.current_title = None;
        ctx.status = STATUS_STARTING.to_string();
        return ctx.event();
    }

    if let Some(caps) = PERCENT.captures(line) {
        let percent = caps[1].parse::<f64>().ok().filter(|p| p.is_finite())?;
        ctx.song_progress = percent.clamp(0.0, 100.0);
        ctx.status = STATUS_DOWNLOADING.to_string();
        return ctx.event();
    }

    if let Some(caps) = DOWNLOAD_DEST.captures(line) {
        ctx.current_title = title_from_path(Path::new(caps[1].trim()));
        ctx.status = STATUS_DOWNLOADING.to_string();
        return ctx.event();
    }

    if let Some(caps) = ALREADY_DONE.captures(line) {
        let path = caps[1].trim();
        if is_mp3(Path::new(path)) {
            ctx.record_output(path);
        } else {
            ctx.current_title = title_from_path(Path::new(path));
        }
        ctx.song_progress = 100.0;
        return ctx.event();
    }

    if POST_PROCESS.is_match(line) {
        if let Some(caps) = AUDIO_DEST
            .captures(line)
            .or_else(|| AUDIO_SKIPPED.captures(line))
        {
            ctx.record_output(&caps[1]);
        }
        ctx.status = STATUS_CONVERTING.to_string();
        return ctx.event();
    }

    None
}

fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"))
}

fn title_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_line_drives_single_progress() {
        let mut ctx = ParseContext::new(ParseMode::Single);
        let event = parse_line("[download]  42.3% of 3.21MiB at 1.20MiB/s ETA 00:02", &mut ctx).unwrap();
        assert_eq!(event.song_progress, 42.3);
        assert_eq!(event.overall_progress, 42.3);
        assert_eq!(event.current_song, None);
        assert_eq!(event.total_songs, None);
    }

    #[test]
    fn banner_resets_song_progress() {
        let mut ctx = ParseContext::new(ParseMode::Playlist);
        parse_line("[download] Downloading item 1 of 3", &mut ctx);
        parse_line("[download] 100% of 1.00MiB", &mut ctx);
        let event = parse_line("[download] Downloading video 2 of 3", &mut ctx).unwrap();
        assert_eq!(event.current_song, Some(2));
        assert_eq!(event.total_songs, Some(3));
        assert_eq!(event.song_progress, 0.0);
        assert_eq!(event.status, STATUS_STARTING);
    }

    #[test]
    fn post_processing_keeps_percentage() {
        let mut ctx = ParseContext::new(ParseMode::Single);
        parse_line("[download]  100% of 3.21MiB", &mut ctx);
        let event = parse_line("[ExtractAudio] Destination: /tmp/out/Song.mp3", &mut ctx).unwrap();
        assert_eq!(event.status, STATUS_CONVERTING);
        assert_eq!(event.song_progress, 100.0);
        assert_eq!(event.current_title.as_deref(), Some("Song"));
        assert_eq!(ctx.outputs(), &[PathBuf::from("/tmp/out/Song.mp3")]);
    }

    #[test]
    fn unknown_and_broken_lines_are_ignored() {
        let mut ctx = ParseContext::new(ParseMode::Playlist);
        assert!(parse_line("", &mut ctx).is_none());
        assert!(parse_line("[youtube] abc123: Downloading webpage", &mut ctx).is_none());
        assert!(parse_line("WARNING: something odd", &mut ctx).is_none());
        assert!(parse_line("[download] Downloading item 99999999999999999999999 of 3", &mut ctx).is_none());
        // 横幅出现前的百分比没有条目序号
        assert!(parse_line("[download]  10.0% of 1MiB", &mut ctx).is_none());
    }
}
