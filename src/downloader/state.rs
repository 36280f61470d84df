use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::FailureKind;

/// 编排器状态机
///
/// `Idle → Resolving → Classifying → Downloading → Finalizing → Completed`，
/// 任意非 Idle 状态都可能进入 `Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    Idle,
    Resolving,
    Classifying,
    Downloading,
    Finalizing,
    Completed,
    Failed(FailureKind),
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed(_))
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != DownloadState::Idle
    }

    /// 进入收尾阶段后文件已经落盘，取消不再生效
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            DownloadState::Resolving | DownloadState::Classifying | DownloadState::Downloading
        )
    }
}

impl Default for DownloadState {
    fn default() -> Self {
        DownloadState::Idle
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadState::Idle => write!(f, "空闲"),
            DownloadState::Resolving => write!(f, "检查依赖"),
            DownloadState::Classifying => write!(f, "分析链接"),
            DownloadState::Downloading => write!(f, "下载中"),
            DownloadState::Finalizing => write!(f, "整理结果"),
            DownloadState::Completed => write!(f, "已完成"),
            DownloadState::Failed(kind) => write!(f, "失败 ({:?})", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_phases_can_be_cancelled() {
        assert!(DownloadState::Resolving.is_cancellable());
        assert!(DownloadState::Downloading.is_cancellable());
        assert!(!DownloadState::Idle.is_cancellable());
        assert!(!DownloadState::Finalizing.is_cancellable());
        assert!(!DownloadState::Completed.is_cancellable());
        assert!(!DownloadState::Failed(FailureKind::Cancelled).is_cancellable());
    }
}
