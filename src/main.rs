use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ytmp3::common::logger::PrettyLogger;
use ytmp3::{
    AppConfig, Bitrate, DownloadResponse, Engine, Preferences, log_error, log_info, log_step,
    log_success, log_warning,
};

mod cli;
mod progress_view;

use cli::{Command, DepsAction, PrefsAction, SetupTarget};
use progress_view::DownloadProgressView;

fn build_config(args: &cli::Cli) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;
    if let Some(dir) = &args.config_dir {
        config.config_dir = dir.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if args.no_bootstrap {
        config.auto_bootstrap = false;
    }
    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("无法获取当前目录")?
            .join(path))
    }
}

async fn run_download(
    engine: &Engine,
    url: Option<String>,
    output_dir: Option<PathBuf>,
    bitrate: Option<u32>,
) -> Result<()> {
    let prefs = engine.get_preferences().await;
    let url = url
        .or_else(|| prefs.last_url.clone())
        .context("请通过 --url 指定视频链接")?;
    let output_dir = output_dir
        .or_else(|| prefs.output_folder.clone())
        .context("请通过 --output-dir 指定保存目录")?;
    let output_dir = absolute(&output_dir)?;
    let bitrate = bitrate
        .or_else(|| prefs.bitrate.map(u32::from))
        .unwrap_or_else(|| Bitrate::default().kbps());

    log_step!("开始下载: {}", url);
    debug!("保存目录: {:?}，码率: {}k", output_dir, bitrate);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let render = tokio::spawn(async move {
        let mut view = DownloadProgressView::new();
        while let Some(event) = rx.recv().await {
            view.update(&event);
        }
        view.finish();
    });

    let result = {
        let download = engine.download(&url, &output_dir, bitrate, tx);
        tokio::pin!(download);
        loop {
            tokio::select! {
                result = &mut download => break result,
                _ = tokio::signal::ctrl_c() => {
                    if engine.cancel() {
                        log_warning!("正在取消下载...");
                    }
                }
            }
        }
    };
    let _ = render.await;

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            log_error!("{}", e);
            if e.suggests_setup() {
                log_info!("可以运行 `ytmp3 deps setup` 自动安装依赖");
            }
            return Err(e.into());
        }
    };

    let summary: Vec<String> = match &response {
        DownloadResponse::Single(result) => vec![result.output_path.display().to_string()],
        DownloadResponse::Playlist(playlist) => {
            let mut lines = vec![format!(
                "播放列表: {}/{} 首",
                playlist.downloaded_videos.len(),
                playlist.total_videos
            )];
            lines.extend(
                playlist
                    .downloaded_videos
                    .iter()
                    .map(|r| r.output_path.display().to_string()),
            );
            lines
        }
    };
    PrettyLogger::completion_summary(summary);

    let prefs = Preferences {
        output_folder: Some(output_dir),
        bitrate: Bitrate::try_from(bitrate).ok(),
        last_url: Some(url),
    };
    if let Err(e) = engine.save_preferences(&prefs).await {
        warn!("保存偏好设置失败: {}", e);
    }
    Ok(())
}

async fn run_deps(engine: &Engine, action: DepsAction) -> Result<()> {
    match action {
        DepsAction::Check => {
            let report = engine.dependency_report().await;
            PrettyLogger::tool_status("yt-dlp", &report.downloader);
            PrettyLogger::tool_status("ffmpeg", &report.transcoder);
            if !report.downloader.present || !report.transcoder.present {
                PrettyLogger::separator();
                println!("{}", report.installation_instructions);
            }
        }
        DepsAction::Setup { target } => {
            if matches!(target, SetupTarget::Downloader | SetupTarget::All) {
                log_step!("准备 yt-dlp");
                let tool = engine.setup_downloader().await?;
                log_success!("yt-dlp: {}", tool.path.display());
            }
            if matches!(target, SetupTarget::Transcoder | SetupTarget::All) {
                log_step!("准备 ffmpeg");
                let tool = engine.setup_transcoder().await?;
                log_success!("ffmpeg: {}", tool.path.display());
            }
        }
        DepsAction::Clear => {
            let removed = engine.clear_bootstrapped_tools().await?;
            log_success!("已删除 {} 个自动安装的文件", removed);
        }
    }
    Ok(())
}

async fn run_prefs(engine: &Engine, action: PrefsAction) -> Result<()> {
    match action {
        PrefsAction::Show => {
            let prefs = engine.get_preferences().await;
            let folder = prefs
                .output_folder
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            PrettyLogger::file_info("保存目录", folder);
            log_info!(
                "码率: {}",
                prefs.bitrate.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string())
            );
            log_info!("上次链接: {}", prefs.last_url.as_deref().unwrap_or("-"));
        }
        PrefsAction::Set {
            output_dir,
            bitrate,
            last_url,
        } => {
            let mut prefs = engine.get_preferences().await;
            if let Some(dir) = output_dir {
                prefs.output_folder = Some(absolute(&dir)?);
            }
            if let Some(kbps) = bitrate {
                prefs.bitrate = Some(Bitrate::try_from(kbps)?);
            }
            if let Some(url) = last_url {
                prefs.last_url = Some(url);
            }
            engine.save_preferences(&prefs).await?;
            log_success!("偏好设置已保存");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // 初始化日志
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = build_config(&args)?;
    let engine = Engine::new(config);

    match args.command {
        Command::Download {
            url,
            output_dir,
            bitrate,
        } => run_download(&engine, url, output_dir, bitrate).await?,
        Command::History { limit } => {
            let history = engine.get_history().await;
            if history.is_empty() {
                log_info!("暂无下载记录");
            }
            let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
            for (index, entry) in history.iter().enumerate().skip(skip).rev() {
                PrettyLogger::history_entry(index + 1, entry);
            }
        }
        Command::ClearHistory => {
            engine.clear_history().await?;
            log_success!("下载历史已清空");
        }
        Command::Prefs { action } => run_prefs(&engine, action).await?,
        Command::Deps { action } => run_deps(&engine, action).await?,
        Command::Convert {
            input,
            output_dir,
            bitrate,
        } => {
            let output_dir = absolute(&output_dir)?;
            if tokio::fs::metadata(&input).await.is_err() {
                bail!("输入文件不存在: {}", input.display());
            }
            log_step!("转换 {}", input.display());
            let result = engine.convert_file(&input, &output_dir, bitrate).await?;
            log_success!("{}", result.output_path.display().to_string().green());
        }
    }

    info!("完成");
    Ok(())
}
