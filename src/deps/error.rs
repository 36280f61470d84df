use std::path::PathBuf;

use thiserror::Error;

use super::tools::Tool;

/// 下载工具到本地时可能出现的底层错误
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("网络请求失败 {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("下载失败 {url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("校验和不匹配: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("校验和列表中没有 {0}")]
    ChecksumMissing(String),

    #[error("解压失败: {0}")]
    Archive(String),

    #[error("写入 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("当前平台没有可用的预编译版本")]
    UnsupportedPlatform,

    #[error("无法确定应用数据目录")]
    NoDataDir,
}

#[derive(Debug, Error)]
pub enum DepsError {
    #[error("未找到 {tool}\n\n{hint}")]
    NotFound { tool: Tool, hint: String },

    #[error("{tool} 自动安装失败: {source}")]
    BootstrapFailed {
        tool: Tool,
        #[source]
        source: BootstrapError,
    },
}

impl DepsError {
    pub fn tool(&self) -> Tool {
        match self {
            DepsError::NotFound { tool, .. } | DepsError::BootstrapFailed { tool, .. } => *tool,
        }
    }
}
