use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use super::{Loaded, StoreError, load_json, write_json_atomic};
use crate::common::models::Bitrate;

/// 上次使用的设置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub output_folder: Option<PathBuf>,
    pub bitrate: Option<Bitrate>,
    pub last_url: Option<String>,
}

pub struct PreferencesStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PreferencesStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// 文件缺失或损坏时返回默认值
    pub async fn load(&self) -> Preferences {
        let _guard = self.lock.lock().await;
        match load_json(&self.path).await {
            Loaded::Missing => Preferences::default(),
            Loaded::Parsed(prefs) => prefs,
            Loaded::Corrupt(reason) => {
                warn!("{}", StoreError::PreferencesCorrupt(reason));
                Preferences::default()
            }
        }
    }

    /// 整条覆盖，后写入的生效
    pub async fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        write_json_atomic(&self.path, prefs).await
    }
}
