use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::deps::ResolverConfig;
use crate::deps::bootstrap::ReleaseSources;
use crate::process::DEFAULT_TAIL_LINES;

pub const APP_DIR_NAME: &str = "ytmp3";
pub const HISTORY_FILE: &str = "history.json";
pub const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("无法确定配置目录，请设置 YTMP3_CONFIG_DIR")]
    NoConfigDir,

    #[error("无法确定数据目录，请设置 YTMP3_DATA_DIR")]
    NoDataDir,
}

/// 引擎的全部运行配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 历史记录和偏好设置所在目录
    pub config_dir: PathBuf,
    /// 自动安装的工具放在其中的 bin/ 下
    pub data_dir: PathBuf,
    pub auto_bootstrap: bool,
    /// 查找工具用的 PATH，`None` 表示使用进程环境
    pub search_path: Option<OsString>,
    pub downloader_override: Option<PathBuf>,
    pub transcoder_override: Option<PathBuf>,
    pub release_sources: ReleaseSources,
    /// 失败时保留的输出行数
    pub tail_lines: usize,
}

impl AppConfig {
    pub fn new(config_dir: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            data_dir: data_dir.as_ref().to_path_buf(),
            auto_bootstrap: true,
            search_path: None,
            downloader_override: None,
            transcoder_override: None,
            release_sources: ReleaseSources::default(),
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// 平台默认目录，再叠加环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_dir = match env_path("YTMP3_CONFIG_DIR") {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or(ConfigError::NoConfigDir)?
                .join(APP_DIR_NAME),
        };
        let data_dir = match env_path("YTMP3_DATA_DIR") {
            Some(dir) => dir,
            None => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join(APP_DIR_NAME),
        };

        let mut config = Self::new(config_dir, data_dir);
        config.downloader_override = env_path("YTDLP_PATH");
        config.transcoder_override = env_path("FFMPEG_PATH");
        config.auto_bootstrap = !std::env::var("YTMP3_NO_BOOTSTRAP")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(config)
    }

    pub fn history_path(&self) -> PathBuf {
        self.config_dir.join(HISTORY_FILE)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.config_dir.join(PREFERENCES_FILE)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            bin_dir: self.bin_dir(),
            search_path: self.search_path.clone(),
            auto_bootstrap: self.auto_bootstrap,
            downloader_override: self.downloader_override.clone(),
            transcoder_override: self.transcoder_override.clone(),
            sources: self.release_sources.clone(),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_live_under_their_directories() {
        let config = AppConfig::new("/cfg", "/data");
        assert_eq!(config.history_path(), Path::new("/cfg/history.json"));
        assert_eq!(config.preferences_path(), Path::new("/cfg/preferences.json"));
        assert_eq!(config.resolver_config().bin_dir, Path::new("/data/bin"));
        assert!(config.auto_bootstrap);
    }
}
