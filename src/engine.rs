//! 对外接口：把各个组件组装起来，供命令行或图形界面调用

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::common::models::{Bitrate, DownloadRequest, DownloadResponse, DownloadResult, ProgressEvent};
use crate::config::AppConfig;
use crate::deps::tools::installation_instructions;
use crate::deps::{Provenance, ResolvedTool, Tool, ToolResolver};
use crate::downloader::notify::{CompletionNotifier, DesktopNotifier};
use crate::downloader::{DownloadError, DownloadOrchestrator, DownloadState};
use crate::post_process::transcode;
use crate::process::{CommandSpec, ProcessRunner};
use crate::store::{HistoryEntry, HistoryStore, Preferences, PreferencesStore, StoreError};

/// `check_required_dependencies` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyPresence {
    pub downloader_present: bool,
    pub transcoder_present: bool,
}

impl DependencyPresence {
    pub fn all_present(&self) -> bool {
        self.downloader_present && self.transcoder_present
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub present: bool,
    pub path: Option<PathBuf>,
    pub provenance: Option<Provenance>,
    pub version: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub downloader: ToolStatus,
    pub transcoder: ToolStatus,
    pub installation_instructions: String,
}

pub struct Engine {
    config: AppConfig,
    resolver: Arc<ToolResolver>,
    history: Arc<HistoryStore>,
    preferences: PreferencesStore,
    orchestrator: DownloadOrchestrator,
    runner: ProcessRunner,
}

impl Engine {
    pub fn new(config: AppConfig) -> Self {
        Self::with_notifier(config, Arc::new(DesktopNotifier))
    }

    pub fn with_notifier(config: AppConfig, notifier: Arc<dyn CompletionNotifier>) -> Self {
        let runner = ProcessRunner::new(config.tail_lines);
        let resolver = Arc::new(ToolResolver::new(config.resolver_config()));
        let history = Arc::new(HistoryStore::new(config.history_path()));
        let preferences = PreferencesStore::new(config.preferences_path());
        let orchestrator =
            DownloadOrchestrator::new(resolver.clone(), history.clone(), notifier, runner);

        debug!("配置目录: {:?}，数据目录: {:?}", config.config_dir, config.data_dir);
        Self {
            config,
            resolver,
            history,
            preferences,
            orchestrator,
            runner,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 下载并转换为 MP3，进度事件通过 `progress` 推送
    pub async fn download(
        &self,
        url: &str,
        output_folder: impl AsRef<Path>,
        bitrate: u32,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<DownloadResponse, DownloadError> {
        let request = DownloadRequest::new(url, output_folder, bitrate)?;
        self.orchestrator.download(request, progress).await
    }

    pub fn cancel(&self) -> bool {
        self.orchestrator.cancel()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DownloadState> {
        self.orchestrator.subscribe_state()
    }

    pub async fn get_history(&self) -> Vec<HistoryEntry> {
        self.history.list().await
    }

    pub async fn clear_history(&self) -> Result<(), StoreError> {
        self.history.clear().await
    }

    pub async fn get_preferences(&self) -> Preferences {
        self.preferences.load().await
    }

    pub async fn save_preferences(&self, prefs: &Preferences) -> Result<(), StoreError> {
        self.preferences.save(prefs).await
    }

    /// 只检查是否存在，不会下载，也不会启动任何进程
    pub async fn check_required_dependencies(&self) -> DependencyPresence {
        DependencyPresence {
            downloader_present: self.resolver.check(Tool::Downloader).await.is_some(),
            transcoder_present: self.resolver.check(Tool::Transcoder).await.is_some(),
        }
    }

    pub async fn setup_downloader(&self) -> Result<ResolvedTool, DownloadError> {
        self.setup(Tool::Downloader).await
    }

    pub async fn setup_transcoder(&self) -> Result<ResolvedTool, DownloadError> {
        self.setup(Tool::Transcoder).await
    }

    async fn setup(&self, tool: Tool) -> Result<ResolvedTool, DownloadError> {
        let resolved = self.resolver.ensure(tool).await?;
        info!("{} 可用: {:?} ({:?})", tool, resolved.path, resolved.provenance);
        Ok(resolved)
    }

    /// 包含版本号的详细依赖状态
    pub async fn dependency_report(&self) -> DependencyReport {
        DependencyReport {
            downloader: self.tool_status(Tool::Downloader).await,
            transcoder: self.tool_status(Tool::Transcoder).await,
            installation_instructions: installation_instructions().to_string(),
        }
    }

    async fn tool_status(&self, tool: Tool) -> ToolStatus {
        let Some(resolved) = self.resolver.check(tool).await else {
            return ToolStatus {
                present: false,
                path: None,
                provenance: None,
                version: None,
                error: Some(format!("未找到 {}", tool)),
            };
        };

        let (version, error) = match self.tool_version(&resolved).await {
            Ok(version) => (Some(version), None),
            Err(e) => (None, Some(e)),
        };
        ToolStatus {
            present: true,
            path: Some(resolved.path),
            provenance: Some(resolved.provenance),
            version,
            error,
        }
    }

    async fn tool_version(&self, resolved: &ResolvedTool) -> Result<String, String> {
        let spec = CommandSpec::new(&resolved.path).arg(resolved.tool.version_arg());
        let mut process = self.runner.spawn(&spec).map_err(|e| e.to_string())?;

        let mut first_line = None;
        while let Some(line) = process.next_line().await {
            if first_line.is_none() && !line.text.trim().is_empty() {
                first_line = Some(line.text.trim().to_string());
            }
        }
        let exit = process.wait().await.map_err(|e| e.to_string())?;
        if !exit.success {
            return Err(format!("{} 执行失败: {}", resolved.tool, exit.tail_text()));
        }
        first_line.ok_or_else(|| format!("{} 没有输出版本信息", resolved.tool))
    }

    /// 删除所有自动安装的工具
    pub async fn clear_bootstrapped_tools(&self) -> std::io::Result<usize> {
        self.resolver.clear_bootstrapped().await
    }

    /// 把本地音视频文件转换成 MP3
    pub async fn convert_file(
        &self,
        input: impl AsRef<Path>,
        output_folder: impl AsRef<Path>,
        bitrate: u32,
    ) -> Result<DownloadResult, DownloadError> {
        let bitrate =
            Bitrate::try_from(bitrate).map_err(|e| DownloadError::InvalidRequest(e.to_string()))?;
        let transcoder = self.resolver.resolve(Tool::Transcoder).await?;
        transcode::convert_to_mp3(
            &self.runner,
            &transcoder.path,
            input.as_ref(),
            output_folder.as_ref(),
            bitrate,
        )
        .await
    }
}
