//! 外部工具（下载器、转码器）的定位与自动安装
//!
//! 分两步：[`ToolResolver::check`] 只做查找，不产生网络和磁盘写入；
//! [`ToolResolver::ensure`] 找不到时会下载到应用数据目录。

pub mod bootstrap;
pub mod error;
pub mod tools;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use bootstrap::{Bootstrapper, ReleaseSources};
pub use error::{BootstrapError, DepsError};
pub use tools::{Provenance, ResolvedTool, Tool, ToolBinaries};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// 自动安装的可执行文件存放目录
    pub bin_dir: PathBuf,
    /// 为 `None` 时使用进程的 PATH
    pub search_path: Option<OsString>,
    pub auto_bootstrap: bool,
    pub downloader_override: Option<PathBuf>,
    pub transcoder_override: Option<PathBuf>,
    pub sources: ReleaseSources,
}

pub struct ToolResolver {
    search_path: Option<OsString>,
    auto_bootstrap: bool,
    downloader_override: Option<PathBuf>,
    transcoder_override: Option<PathBuf>,
    bootstrapper: Bootstrapper,
    // 每个工具一个槽位，安装过程中持有锁，避免并发重复下载
    downloader: Mutex<Option<ResolvedTool>>,
    transcoder: Mutex<Option<ResolvedTool>>,
}

impl ToolResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            search_path: config.search_path,
            auto_bootstrap: config.auto_bootstrap,
            downloader_override: config.downloader_override,
            transcoder_override: config.transcoder_override,
            bootstrapper: Bootstrapper::new(&config.bin_dir, config.sources),
            downloader: Mutex::new(None),
            transcoder: Mutex::new(None),
        }
    }

    pub fn bin_dir(&self) -> &Path {
        self.bootstrapper.bin_dir()
    }

    /// 只查找，不下载。结果会被缓存。
    pub async fn check(&self, tool: Tool) -> Option<ResolvedTool> {
        let mut slot = self.slot(tool).lock().await;
        self.lookup(tool, &mut slot).await
    }

    /// 下载流程使用：找不到时仅在允许自动安装的情况下才会下载
    pub async fn resolve(&self, tool: Tool) -> Result<ResolvedTool, DepsError> {
        self.acquire(tool, self.auto_bootstrap).await
    }

    /// 显式安装：找不到就下载，已存在时只做一次存在性检查
    pub async fn ensure(&self, tool: Tool) -> Result<ResolvedTool, DepsError> {
        self.acquire(tool, true).await
    }

    pub async fn resolve_all(&self) -> Result<ToolBinaries, DepsError> {
        Ok(ToolBinaries {
            downloader: self.resolve(Tool::Downloader).await?,
            transcoder: self.resolve(Tool::Transcoder).await?,
        })
    }

    /// 丢弃缓存，下次查找重新扫描
    pub async fn invalidate(&self) {
        for tool in Tool::ALL {
            *self.slot(tool).lock().await = None;
        }
    }

    /// 删除 bin/ 下所有自动安装的文件，返回删除的数量
    pub async fn clear_bootstrapped(&self) -> std::io::Result<usize> {
        let mut downloader = self.downloader.lock().await;
        let mut transcoder = self.transcoder.lock().await;
        *downloader = None;
        *transcoder = None;

        let mut entries = match tokio::fs::read_dir(self.bin_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                debug!("已删除 {:?}", entry.path());
                removed += 1;
            }
        }

        info!("已清理 {} 个自动安装的工具文件", removed);
        Ok(removed)
    }

    async fn acquire(&self, tool: Tool, allow_bootstrap: bool) -> Result<ResolvedTool, DepsError> {
        let mut slot = self.slot(tool).lock().await;
        if let Some(found) = self.lookup(tool, &mut slot).await {
            return Ok(found);
        }

        if !allow_bootstrap {
            return Err(DepsError::NotFound {
                tool,
                hint: missing_hint(tool),
            });
        }

        info!("未找到 {}，开始自动安装", tool);
        let path = self
            .bootstrapper
            .provision(tool)
            .await
            .map_err(|source| DepsError::BootstrapFailed { tool, source })?;

        let resolved = ResolvedTool {
            tool,
            path,
            provenance: Provenance::Bootstrapped,
        };
        *slot = Some(resolved.clone());
        Ok(resolved)
    }

    /// 缓存命中时只重新确认文件仍然可用
    async fn lookup(&self, tool: Tool, slot: &mut Option<ResolvedTool>) -> Option<ResolvedTool> {
        if let Some(cached) = slot.as_ref() {
            if tools::is_usable_executable(&cached.path).await {
                return Some(cached.clone());
            }
            warn!("缓存的 {} 已不可用: {:?}", tool, cached.path);
            *slot = None;
        }

        let found = self.locate(tool).await?;
        debug!("找到 {}: {:?} ({:?})", tool, found.path, found.provenance);
        *slot = Some(found.clone());
        Some(found)
    }

    async fn locate(&self, tool: Tool) -> Option<ResolvedTool> {
        let resolved = |path: PathBuf, provenance| ResolvedTool {
            tool,
            path,
            provenance,
        };

        if let Some(path) = self.override_for(tool) {
            if tools::is_usable_executable(path).await {
                return Some(resolved(path.to_path_buf(), Provenance::Configured));
            }
            warn!("指定的 {} 路径不可用，继续查找: {:?}", tool, path);
        }

        let executable = tool.executable_name();
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();
        if let Some(path) = tools::find_in_search_path(&executable, &search_path).await {
            return Some(resolved(path, Provenance::FoundInPath));
        }

        let local = self.bootstrapper.target_path(tool);
        if tools::is_usable_executable(&local).await {
            return Some(resolved(local, Provenance::Bootstrapped));
        }
        None
    }

    fn override_for(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::Downloader => self.downloader_override.as_deref(),
            Tool::Transcoder => self.transcoder_override.as_deref(),
        }
    }

    fn slot(&self, tool: Tool) -> &Mutex<Option<ResolvedTool>> {
        match tool {
            Tool::Downloader => &self.downloader,
            Tool::Transcoder => &self.transcoder,
        }
    }
}

fn missing_hint(tool: Tool) -> String {
    format!(
        "{} 不在 PATH 中，也没有自动安装的副本。可以运行 `ytmp3 deps setup` 自动安装，或手动安装:\n\n{}",
        tool,
        tools::installation_instructions()
    )
}
