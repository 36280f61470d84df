use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// 在线视频转 MP3 下载器
#[derive(Parser, Debug)]
#[command(name = "ytmp3")]
#[command(version = "0.1")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "下载在线视频并转换为 MP3，依赖 yt-dlp 与 ffmpeg", long_about = None)]
pub struct Cli {
    /// 输出调试日志
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// 配置目录（历史记录与偏好设置）
    #[arg(long, value_name = "DIR", global = true)]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub config_dir: Option<PathBuf>,

    /// 数据目录（自动安装的工具）
    #[arg(long, value_name = "DIR", global = true)]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// 找不到依赖时不要自动下载
    #[arg(long, global = true)]
    pub no_bootstrap: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 下载视频或播放列表并转换为 MP3
    Download {
        /// 视频或播放列表链接，缺省时使用上次的链接
        #[arg(long, value_name = "URL")]
        #[arg(value_hint = clap::ValueHint::Url)]
        url: Option<String>,

        /// 保存目录，缺省时使用上次的目录
        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        output_dir: Option<PathBuf>,

        /// 码率 (kbps)
        #[arg(long, value_name = "KBPS")]
        #[arg(help = "码率: 128、192 或 320，缺省时使用上次的设置")]
        bitrate: Option<u32>,
    },

    /// 查看下载历史
    History {
        /// 只显示最近的 N 条
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },

    /// 清空下载历史
    ClearHistory,

    /// 查看或修改偏好设置
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// 依赖检查与安装
    Deps {
        #[command(subcommand)]
        action: DepsAction,
    },

    /// 把本地音视频文件转换为 MP3
    Convert {
        #[arg(long, value_name = "FILE")]
        #[arg(value_hint = clap::ValueHint::FilePath)]
        input: PathBuf,

        #[arg(long, value_name = "DIR")]
        #[arg(value_hint = clap::ValueHint::DirPath)]
        output_dir: PathBuf,

        #[arg(long, value_name = "KBPS", default_value_t = 192)]
        bitrate: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum PrefsAction {
    Show,
    Set {
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        #[arg(long, value_name = "KBPS")]
        bitrate: Option<u32>,

        #[arg(long, value_name = "URL")]
        last_url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DepsAction {
    /// 检查 yt-dlp 与 ffmpeg 是否可用
    Check,
    /// 安装缺失的工具
    Setup {
        #[arg(value_enum, default_value_t = SetupTarget::All)]
        target: SetupTarget,
    },
    /// 删除自动安装的工具
    Clear,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupTarget {
    Downloader,
    Transcoder,
    All,
}
