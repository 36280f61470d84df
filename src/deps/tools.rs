use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 引擎依赖的两个外部工具
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tool {
    /// 负责抓取和转码的下载器（yt-dlp）
    Downloader,
    /// 负责音频转码的转码器（ffmpeg）
    Transcoder,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Downloader, Tool::Transcoder];

    pub fn binary_name(self) -> &'static str {
        match self {
            Tool::Downloader => "yt-dlp",
            Tool::Transcoder => "ffmpeg",
        }
    }

    /// 当前平台上的可执行文件名
    pub fn executable_name(self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.exe", self.binary_name())
        } else {
            self.binary_name().to_string()
        }
    }

    pub fn version_arg(self) -> &'static str {
        match self {
            Tool::Downloader => "--version",
            Tool::Transcoder => "-version",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// 可执行文件的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// 通过环境变量显式指定
    Configured,
    /// 在系统 PATH 中找到
    FoundInPath,
    /// 之前由本程序下载到应用数据目录
    Bootstrapped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTool {
    pub tool: Tool,
    pub path: PathBuf,
    pub provenance: Provenance,
}

/// 一次下载所需的两个工具
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinaries {
    pub downloader: ResolvedTool,
    pub transcoder: ResolvedTool,
}

/// 在给定的搜索路径（PATH 格式）中查找可执行文件
pub async fn find_in_search_path(executable: &str, search_path: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(executable);
        if is_usable_executable(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// 文件存在、非空，在 Unix 上还要求有执行权限。零字节文件视为占位符。
pub async fn is_usable_executable(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// 当前系统下的手动安装说明
pub fn installation_instructions() -> &'static str {
    if cfg!(target_os = "windows") {
        "Windows 安装方法:\n\
         yt-dlp:\n\
         - 下载: https://github.com/yt-dlp/yt-dlp/releases/latest\n\
         - 或: winget install yt-dlp\n\
         FFmpeg:\n\
         - 下载: https://ffmpeg.org/download.html\n\
         - 或: winget install ffmpeg\n\
         安装后请重启程序使 PATH 生效"
    } else if cfg!(target_os = "macos") {
        "macOS 安装方法:\n\
         yt-dlp:\n\
         - brew install yt-dlp\n\
         - 或: pip install yt-dlp\n\
         FFmpeg:\n\
         - brew install ffmpeg"
    } else {
        "Linux 安装方法:\n\
         yt-dlp:\n\
         - pip install yt-dlp\n\
         - 或: sudo apt install yt-dlp\n\
         FFmpeg:\n\
         - sudo apt install ffmpeg\n\
         - 或: sudo pacman -S ffmpeg"
    }
}
