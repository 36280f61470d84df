//! 下载编排器：串起依赖解析、子进程和进度解析，负责单曲与播放列表两种流程

pub mod command;
pub mod error;
pub mod finalize;
pub mod notify;
pub mod state;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::models::{
    DownloadRequest, DownloadResponse, PlaylistDownloadResult, ProgressEvent,
};
use crate::deps::{ToolBinaries, ToolResolver};
use crate::parser::progress::{self, ParseContext, ParseMode, STATUS_COMPLETE};
use crate::process::{ProcessRunner, RunningProcess};
use crate::store::{HistoryEntry, HistoryStore};

pub use error::{DownloadError, FailureKind};
use notify::CompletionNotifier;
pub use state::DownloadState;

/// 同一时刻只允许一个下载，槽位里放着当前下载的取消令牌
type ActiveSlot = Mutex<Option<CancellationToken>>;

struct ActiveGuard<'a> {
    slot: &'a ActiveSlot,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

pub struct DownloadOrchestrator {
    resolver: Arc<ToolResolver>,
    history: Arc<HistoryStore>,
    notifier: Arc<dyn CompletionNotifier>,
    runner: ProcessRunner,
    state: watch::Sender<DownloadState>,
    active: ActiveSlot,
}

impl DownloadOrchestrator {
    pub fn new(
        resolver: Arc<ToolResolver>,
        history: Arc<HistoryStore>,
        notifier: Arc<dyn CompletionNotifier>,
        runner: ProcessRunner,
    ) -> Self {
        let (state, _) = watch::channel(DownloadState::Idle);
        Self {
            resolver,
            history,
            notifier,
            runner,
            state,
            active: Mutex::new(None),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// 取消当前下载。没有下载在进行、或下载已进入收尾阶段时返回 `false`。
    pub fn cancel(&self) -> bool {
        let slot = self.lock_slot();
        let Some(token) = slot.as_ref() else {
            return false;
        };
        let state = self.state();
        if !state.is_cancellable() {
            debug!("当前状态为 {}，忽略取消请求", state);
            return false;
        }
        info!("请求取消当前下载");
        token.cancel();
        true
    }

    /// 执行一次下载。进度事件按输出顺序发送到 `progress`，接收端关闭不影响下载。
    pub async fn download(
        &self,
        request: DownloadRequest,
        progress: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<DownloadResponse, DownloadError> {
        check_output_folder(request.output_folder()).await?;

        let (_guard, token) = self.claim()?;
        info!("开始下载: {} ({})", request.url(), request.bitrate());

        let result = self.run(&request, &progress, &token).await;
        match &result {
            Ok(_) => self.set_state(DownloadState::Completed),
            Err(e) => {
                error!("下载失败: {}", e);
                self.set_state(DownloadState::Failed(e.kind()));
            }
        }
        result
    }

    async fn run(
        &self,
        request: &DownloadRequest,
        progress: &mpsc::UnboundedSender<ProgressEvent>,
        token: &CancellationToken,
    ) -> Result<DownloadResponse, DownloadError> {
        let binaries = self.resolver.resolve_all().await?;
        debug!("下载器: {:?}，转码器: {:?}", binaries.downloader.path, binaries.transcoder.path);

        self.set_state(DownloadState::Classifying);
        let mode = if request.is_playlist() {
            ParseMode::Playlist
        } else {
            ParseMode::Single
        };
        info!("链接类型: {:?}", request.kind());

        let snapshot = match mode {
            ParseMode::Playlist => Some(
                finalize::snapshot_mp3s(request.output_folder())
                    .await
                    .map_err(|e| DownloadError::output("无法读取输出目录", e))?,
            ),
            ParseMode::Single => None,
        };

        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        self.set_state(DownloadState::Downloading);
        let spec = command::downloader_command(&binaries, request);
        let mut process = self.runner.spawn(&spec)?;
        let mut ctx = ParseContext::new(mode);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(terminate(&mut process).await);
                }
                line = process.next_line() => match line {
                    Some(line) => {
                        debug!("[{:?}] {}", line.stream, line.text);
                        if let Some(event) = progress::parse_line(&line.text, &mut ctx) {
                            let _ = progress.send(event);
                        }
                    }
                    None => break,
                },
            }
        }

        let exit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(terminate(&mut process).await),
            exit = process.wait() => exit?,
        };
        if !exit.success {
            return Err(DownloadError::ToolExecutionFailed {
                code: exit.code,
                tail: exit.tail_text(),
            });
        }

        self.begin_finalizing(token)?;
        let response = self
            .finalize(request, &binaries, &ctx, snapshot.as_ref())
            .await?;

        let _ = progress.send(completion_event(&response, &ctx));
        self.record_history(request, &response).await;
        self.announce(&response).await;
        Ok(response)
    }

    async fn finalize(
        &self,
        request: &DownloadRequest,
        binaries: &ToolBinaries,
        ctx: &ParseContext,
        snapshot: Option<&HashSet<PathBuf>>,
    ) -> Result<DownloadResponse, DownloadError> {
        let folder = request.output_folder();
        let outputs = finalize::collect_outputs(ctx, folder, snapshot).await?;

        let mut results = Vec::with_capacity(outputs.len());
        for path in &outputs {
            results.push(finalize::describe(path, &self.runner, &binaries.transcoder.path).await?);
        }

        if ctx.mode() == ParseMode::Single {
            let result = results.into_iter().next().ok_or_else(|| {
                DownloadError::OutputError(format!(
                    "下载器已正常退出，但在 {} 中没有找到输出文件",
                    folder.display()
                ))
            })?;
            info!("✅ 下载完成: {:?}", result.output_path);
            return Ok(DownloadResponse::Single(result));
        }

        let total_videos = ctx.total_songs().unwrap_or(results.len());
        if total_videos > 0 && results.is_empty() {
            return Err(DownloadError::OutputError(format!(
                "播放列表共 {} 项，但在 {} 中没有找到任何输出文件",
                total_videos,
                folder.display()
            )));
        }
        if results.len() < total_videos {
            warn!("播放列表共 {} 项，实际得到 {} 个文件", total_videos, results.len());
        }
        info!("✅ 播放列表下载完成: {}/{}", results.len(), total_videos);

        Ok(DownloadResponse::Playlist(PlaylistDownloadResult {
            output_folder: folder.to_path_buf(),
            total_videos,
            downloaded_videos: results,
        }))
    }

    /// 历史记录写入失败只记录日志，文件已经下载完成
    async fn record_history(&self, request: &DownloadRequest, response: &DownloadResponse) {
        let entries = response
            .items()
            .into_iter()
            .map(|item| HistoryEntry::completed(request.url(), request.bitrate(), item))
            .collect();
        if let Err(e) = self.history.append_all(entries).await {
            warn!("写入历史记录失败: {}", e);
        }
    }

    async fn announce(&self, response: &DownloadResponse) {
        let body = match response {
            DownloadResponse::Single(result) => result
                .title
                .clone()
                .unwrap_or_else(|| result.output_path.display().to_string()),
            DownloadResponse::Playlist(playlist) => format!(
                "播放列表下载完成，共 {} 首",
                playlist.downloaded_videos.len()
            ),
        };
        self.notifier.notify("下载完成", &body).await;
    }

    fn claim(&self) -> Result<(ActiveGuard<'_>, CancellationToken), DownloadError> {
        let mut slot = self.lock_slot();
        if slot.is_some() {
            warn!("已有下载正在进行，拒绝新的请求");
            return Err(DownloadError::DownloadInProgress);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        self.set_state(DownloadState::Resolving);
        Ok((ActiveGuard { slot: &self.active }, token))
    }

    /// 与 `cancel` 持有同一把锁，取消要么在此之前生效，要么被拒绝
    fn begin_finalizing(&self, token: &CancellationToken) -> Result<(), DownloadError> {
        let _slot = self.lock_slot();
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        self.set_state(DownloadState::Finalizing);
        Ok(())
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: DownloadState) {
        debug!("状态切换: {}", state);
        self.state.send_replace(state);
    }
}

async fn terminate(process: &mut RunningProcess) -> DownloadError {
    warn!("下载已取消，终止下载进程 {:?}", process.id());
    if let Err(e) = process.kill().await {
        warn!("终止下载进程失败: {}", e);
    }
    DownloadError::Cancelled
}

fn completion_event(response: &DownloadResponse, ctx: &ParseContext) -> ProgressEvent {
    match response {
        DownloadResponse::Single(result) => ProgressEvent::single(
            100.0,
            STATUS_COMPLETE,
            result.title.clone().or_else(|| ctx.current_title().map(str::to_string)),
        ),
        DownloadResponse::Playlist(playlist) => {
            let total = playlist.total_videos.max(1);
            ProgressEvent::playlist(
                total,
                total,
                100.0,
                STATUS_COMPLETE,
                playlist.downloaded_videos.last().and_then(|r| r.title.clone()),
            )
        }
    }
}

/// 目录必须存在；再写一个探测文件确认可写
async fn check_output_folder(folder: &Path) -> Result<(), DownloadError> {
    match tokio::fs::metadata(folder).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DownloadError::InvalidRequest(format!(
                "输出路径不是目录: {}",
                folder.display()
            )));
        }
        Err(_) => {
            return Err(DownloadError::InvalidRequest(format!(
                "输出目录不存在: {}",
                folder.display()
            )));
        }
    }

    let probe = folder.join(format!(".ytmp3-write-test-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| DownloadError::output(&format!("输出目录不可写 {}", folder.display()), e))?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        warn!("删除探测文件 {:?} 失败: {}", probe, e);
    }
    Ok(())
}
