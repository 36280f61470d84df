//! 基于 JSON 文件的持久化
//!
//! 写入时先写同目录下的临时文件再改名替换，进程在写入中途崩溃也不会留下截断的文件。
//! 读取时文件缺失或损坏都不算致命错误，由各个存储决定如何回退。

pub mod history;
pub mod preferences;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub use history::{HistoryEntry, HistoryStore, MAX_HISTORY_ENTRIES};
pub use preferences::{Preferences, PreferencesStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("历史记录文件损坏，已按空记录处理: {0}")]
    HistoryCorrupt(String),

    #[error("偏好设置文件损坏，已使用默认设置: {0}")]
    PreferencesCorrupt(String),

    #[error("读写 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub(crate) enum Loaded<T> {
    Missing,
    Parsed(T),
    Corrupt(String),
}

pub(crate) async fn load_json<T: DeserializeOwned>(path: &Path) -> Loaded<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Loaded::Missing,
        Err(e) => return Loaded::Corrupt(format!("无法读取 {:?}: {}", path, e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Loaded::Missing;
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => Loaded::Parsed(value),
        Err(e) => Loaded::Corrupt(format!("{:?}: {}", path, e)),
    }
}

pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    };

    let json = serde_json::to_vec_pretty(value)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store");
    let temp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result: Result<(), StoreError> = async {
        let mut file = tokio::fs::File::create(&temp).await.map_err(io_err(&temp))?;
        file.write_all(&json).await.map_err(io_err(&temp))?;
        file.sync_all().await.map_err(io_err(&temp))?;
        drop(file);
        tokio::fs::rename(&temp, path).await.map_err(io_err(path))
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!("清理临时文件 {:?} 失败: {}", temp, e);
        }
    }
    result
}
