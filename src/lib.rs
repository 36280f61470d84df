//! 在线视频下载并转换为 MP3 的编排引擎
//!
//! 驱动外部下载器（yt-dlp）和转码器（ffmpeg），负责依赖定位与自动安装、
//! 子进程输出的进度解析、单曲/播放列表下载流程以及下载历史的持久化。

pub mod common;
pub mod config;
pub mod deps;
pub mod downloader;
pub mod engine;
pub mod parser;
pub mod post_process;
pub mod process;
pub mod store;

pub use common::models::{
    Bitrate, DownloadRequest, DownloadResponse, DownloadResult, PlaylistDownloadResult,
    ProgressEvent,
};
pub use config::AppConfig;
pub use downloader::{DownloadError, DownloadState, FailureKind};
pub use engine::{DependencyPresence, DependencyReport, Engine, ToolStatus};
pub use store::{HistoryEntry, Preferences};
