use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Loaded, StoreError, load_json, write_json_atomic};
use crate::common::models::{Bitrate, DownloadResult};

pub const MAX_HISTORY_ENTRIES: usize = 100;

/// 一条已完成的下载记录，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub url: String,
    pub title: Option<String>,
    pub output_path: PathBuf,
    pub bitrate: Bitrate,
    /// ISO-8601，完成时刻
    pub timestamp: String,
    pub duration_seconds: Option<f64>,
}

impl HistoryEntry {
    pub fn completed(url: &str, bitrate: Bitrate, result: &DownloadResult) -> Self {
        Self {
            url: url.to_string(),
            title: result.title.clone(),
            output_path: result.output_path.clone(),
            bitrate,
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration_seconds: result.duration_seconds,
        }
    }
}

/// 按完成顺序保存的下载记录，最多 [`MAX_HISTORY_ENTRIES`] 条
pub struct HistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 最早的在前。文件缺失或损坏时返回空列表。
    pub async fn list(&self) -> Vec<HistoryEntry> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn append(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        self.append_all(vec![entry]).await
    }

    /// 一次写入多条，超出上限时淘汰最早的记录
    pub async fn append_all(&self, entries: Vec<HistoryEntry>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut log = self.read().await;
        log.extend(entries);
        truncate_oldest(&mut log);
        write_json_atomic(&self.path, &log).await?;
        debug!("历史记录已保存，共 {} 条", log.len());
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        write_json_atomic(&self.path, &Vec::<HistoryEntry>::new()).await
    }

    async fn read(&self) -> Vec<HistoryEntry> {
        match load_json::<Vec<HistoryEntry>>(&self.path).await {
            Loaded::Missing => Vec::new(),
            Loaded::Parsed(mut log) => {
                truncate_oldest(&mut log);
                log
            }
            Loaded::Corrupt(reason) => {
                warn!("{}", StoreError::HistoryCorrupt(reason));
                Vec::new()
            }
        }
    }
}

fn truncate_oldest(log: &mut Vec<HistoryEntry>) {
    if log.len() > MAX_HISTORY_ENTRIES {
        let overflow = log.len() - MAX_HISTORY_ENTRIES;
        log.drain(..overflow);
    }
}
