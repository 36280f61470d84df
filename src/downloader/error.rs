use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deps::{DepsError, Tool};
use crate::process::ProcessError;

/// 失败原因的扁平分类，调用方据此决定给出什么补救操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidRequest,
    DependencyMissing,
    BootstrapFailed,
    ToolExecutionFailed,
    OutputError,
    Cancelled,
    DownloadInProgress,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    #[error("缺少依赖 {tool}\n{hint}")]
    DependencyMissing { tool: Tool, hint: String },

    #[error("{tool} 安装失败: {reason}")]
    BootstrapFailed { tool: Tool, reason: String },

    #[error("外部工具执行失败（{}）\n{tail}", describe_code(.code))]
    ToolExecutionFailed { code: Option<i32>, tail: String },

    #[error("输出目录错误: {0}")]
    OutputError(String),

    #[error("下载已取消")]
    Cancelled,

    #[error("已有下载正在进行，请等待完成后再试")]
    DownloadInProgress,
}

impl DownloadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::InvalidRequest(_) => FailureKind::InvalidRequest,
            DownloadError::DependencyMissing { .. } => FailureKind::DependencyMissing,
            DownloadError::BootstrapFailed { .. } => FailureKind::BootstrapFailed,
            DownloadError::ToolExecutionFailed { .. } => FailureKind::ToolExecutionFailed,
            DownloadError::OutputError(_) => FailureKind::OutputError,
            DownloadError::Cancelled => FailureKind::Cancelled,
            DownloadError::DownloadInProgress => FailureKind::DownloadInProgress,
        }
    }

    /// 是否应当提示用户运行依赖安装
    pub fn suggests_setup(&self) -> bool {
        matches!(
            self,
            DownloadError::DependencyMissing { .. } | DownloadError::BootstrapFailed { .. }
        )
    }

    pub(crate) fn output(context: &str, err: impl std::fmt::Display) -> Self {
        DownloadError::OutputError(format!("{}: {}", context, err))
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("退出码 {}", code),
        None => "未正常退出".to_string(),
    }
}

impl From<DepsError> for DownloadError {
    fn from(error: DepsError) -> Self {
        match error {
            DepsError::NotFound { tool, hint } => DownloadError::DependencyMissing { tool, hint },
            DepsError::BootstrapFailed { tool, source } => {
                let mut reason = source.to_string();
                let mut cause = std::error::Error::source(&source);
                while let Some(inner) = cause {
                    reason.push_str(&format!("\n  原因: {}", inner));
                    cause = inner.source();
                }
                DownloadError::BootstrapFailed { tool, reason }
            }
        }
    }
}

impl From<ProcessError> for DownloadError {
    fn from(error: ProcessError) -> Self {
        DownloadError::ToolExecutionFailed {
            code: None,
            tail: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_errors_suggest_setup() {
        let missing = DownloadError::from(DepsError::NotFound {
            tool: Tool::Downloader,
            hint: "pip install yt-dlp".to_string(),
        });
        assert_eq!(missing.kind(), FailureKind::DependencyMissing);
        assert!(missing.suggests_setup());
        assert!(!DownloadError::Cancelled.suggests_setup());
    }

    #[test]
    fn tool_failure_message_keeps_tail_lines() {
        let error = DownloadError::ToolExecutionFailed {
            code: Some(1),
            tail: "ERROR: line one\nERROR: line two".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("退出码 1"));
        assert!(message.ends_with("ERROR: line one\nERROR: line two"));
    }
}
