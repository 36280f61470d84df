use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::BootstrapError;
use super::tools::Tool;

const DOWNLOADER_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";
const DOWNLOADER_CHECKSUMS: &str = "SHA2-256SUMS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// 直接就是可执行文件
    Raw,
    Gzip,
    Zip,
}

/// 一个可下载的预编译文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    pub format: ArtifactFormat,
    /// 校验和列表的地址，以及列表中对应的文件名
    pub checksum: Option<(String, String)>,
}

/// 预编译文件的下载来源
#[derive(Debug, Clone)]
pub struct ReleaseSources {
    pub downloader_base_url: String,
    pub transcoder: Option<Artifact>,
}

impl Default for ReleaseSources {
    fn default() -> Self {
        Self {
            downloader_base_url: DOWNLOADER_RELEASE_BASE.to_string(),
            transcoder: default_transcoder_artifact(),
        }
    }
}

impl ReleaseSources {
    pub fn artifact(&self, tool: Tool) -> Result<Artifact, BootstrapError> {
        match tool {
            Tool::Downloader => {
                let asset = downloader_asset().ok_or(BootstrapError::UnsupportedPlatform)?;
                let base = self.downloader_base_url.trim_end_matches('/');
                Ok(Artifact {
                    url: format!("{}/{}", base, asset),
                    format: ArtifactFormat::Raw,
                    checksum: Some((format!("{}/{}", base, DOWNLOADER_CHECKSUMS), asset.to_string())),
                })
            }
            Tool::Transcoder => self
                .transcoder
                .clone()
                .ok_or(BootstrapError::UnsupportedPlatform),
        }
    }
}

fn downloader_asset() -> Option<&'static str> {
    if cfg!(target_os = "windows") {
        Some("yt-dlp.exe")
    } else if cfg!(target_os = "macos") {
        Some("yt-dlp_macos")
    } else if cfg!(target_arch = "x86_64") {
        Some("yt-dlp_linux")
    } else if cfg!(target_arch = "aarch64") {
        Some("yt-dlp_linux_aarch64")
    } else {
        None
    }
}

fn default_transcoder_artifact() -> Option<Artifact> {
    let (url, format) = if cfg!(target_os = "windows") {
        ("https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip", ArtifactFormat::Zip)
    } else if cfg!(target_os = "macos") {
        ("https://evermeet.cx/ffmpeg/ffmpeg-7.0.zip", ArtifactFormat::Zip)
    } else if cfg!(target_arch = "x86_64") {
        (
            "https://github.com/eugeneware/ffmpeg-static/releases/download/b6.0/ffmpeg-linux-x64.gz",
            ArtifactFormat::Gzip,
        )
    } else if cfg!(target_arch = "aarch64") {
        (
            "https://github.com/eugeneware/ffmpeg-static/releases/download/b6.0/ffmpeg-linux-arm64.gz",
            ArtifactFormat::Gzip,
        )
    } else {
        return None;
    };

    Some(Artifact {
        url: url.to_string(),
        format,
        checksum: None,
    })
}

// -----------------------------------------------------------------------------------------------

/// 把工具下载到应用数据目录下的 bin/
pub struct Bootstrapper {
    client: reqwest::Client,
    sources: ReleaseSources,
    bin_dir: PathBuf,
}

impl Bootstrapper {
    pub fn new(bin_dir: impl AsRef<Path>, sources: ReleaseSources) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            sources,
            bin_dir: bin_dir.as_ref().to_path_buf(),
        }
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn target_path(&self, tool: Tool) -> PathBuf {
        self.bin_dir.join(tool.executable_name())
    }

    pub async fn provision(&self, tool: Tool) -> Result<PathBuf, BootstrapError> {
        let artifact = self.sources.artifact(tool)?;
        info!("开始下载 {}: {}", tool, artifact.url);

        let bytes = self.fetch(&artifact.url).await?;
        debug!("{} 下载完成，共 {} 字节", tool, bytes.len());

        if let Some((sums_url, asset)) = &artifact.checksum {
            let sums = self.fetch(sums_url).await?;
            let sums = String::from_utf8_lossy(&sums);
            let expected = parse_checksums(&sums, asset)
                .ok_or_else(|| BootstrapError::ChecksumMissing(asset.clone()))?;
            verify_sha256(&bytes, &expected)?;
            debug!("{} 校验和验证通过", tool);
        }

        let executable = tool.executable_name();
        let format = artifact.format;
        let binary = tokio::task::spawn_blocking(move || unpack(bytes, format, &executable))
            .await
            .map_err(|e| BootstrapError::Archive(e.to_string()))??;

        if binary.is_empty() {
            return Err(BootstrapError::Archive("解压得到的文件为空".to_string()));
        }

        let target = self.target_path(tool);
        install_atomically(&binary, &target).await?;
        info!("✅ {} 已安装到 {:?}", tool, target);
        Ok(target)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BootstrapError> {
        let network = |source| BootstrapError::Network {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BootstrapError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.map_err(network)?);
        }
        Ok(body)
    }
}

fn unpack(bytes: Vec<u8>, format: ArtifactFormat, executable: &str) -> Result<Vec<u8>, BootstrapError> {
    match format {
        ArtifactFormat::Raw => Ok(bytes),
        ArtifactFormat::Gzip => gunzip(&bytes),
        ArtifactFormat::Zip => extract_from_zip(&bytes, executable),
    }
}

/// 解析 `sha256  文件名` 格式的校验和列表
pub fn parse_checksums(text: &str, asset: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let hash = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        (name == asset && hash.len() == 64).then(|| hash.to_ascii_lowercase())
    })
}

pub fn verify_sha256(bytes: &[u8], expected_hex: &str) -> Result<(), BootstrapError> {
    let actual: String = Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(BootstrapError::ChecksumMismatch {
            expected: expected_hex.to_string(),
            actual,
        })
    }
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, BootstrapError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BootstrapError::Archive(format!("gzip 解压失败: {}", e)))?;
    Ok(out)
}

/// 从 zip 包中取出名为 `executable` 的文件（忽略目录层级）
pub fn extract_from_zip(bytes: &[u8], executable: &str) -> Result<Vec<u8>, BootstrapError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| BootstrapError::Archive(format!("无法读取 zip: {}", e)))?;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| BootstrapError::Archive(e.to_string()))?;
        let matches = Path::new(file.name())
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == executable);
        if file.is_file() && matches {
            let mut out = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut out)
                .map_err(|e| BootstrapError::Archive(e.to_string()))?;
            return Ok(out);
        }
    }

    Err(BootstrapError::Archive(format!("压缩包中没有找到 {}", executable)))
}

/// 先写临时文件、设置执行权限，再改名替换，中途崩溃不会留下半个可执行文件
pub async fn install_atomically(bytes: &[u8], target: &Path) -> Result<(), BootstrapError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| BootstrapError::Io { path, source }
    };

    let parent = target.parent().ok_or(BootstrapError::NoDataDir)?;
    tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;

    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tool");
    let temp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result: Result<(), BootstrapError> = async {
        let mut file = tokio::fs::File::create(&temp).await.map_err(io_err(&temp))?;
        file.write_all(bytes).await.map_err(io_err(&temp))?;
        file.sync_all().await.map_err(io_err(&temp))?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(io_err(&temp))?;
        }

        tokio::fs::rename(&temp, target).await.map_err(io_err(target))
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!("清理临时文件 {:?} 失败: {}", temp, e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn finds_asset_in_checksum_list() {
        let hash = "a".repeat(64);
        let text = format!("{}  yt-dlp.exe\n{}  yt-dlp_linux\n", "b".repeat(64), hash);
        assert_eq!(parse_checksums(&text, "yt-dlp_linux"), Some(hash));
        assert_eq!(parse_checksums(&text, "yt-dlp_macos"), None);
    }

    #[test]
    fn sha256_mismatch_is_reported() {
        // sha256("abc")
        let good = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(verify_sha256(b"abc", good).is_ok());
        assert!(matches!(
            verify_sha256(b"abd", good),
            Err(BootstrapError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn gunzip_round_trips_payload() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"#!/bin/sh\necho ffmpeg\n").unwrap();
        let packed = encoder.finish().unwrap();
        assert_eq!(gunzip(&packed).unwrap(), b"#!/bin/sh\necho ffmpeg\n");
        assert!(gunzip(b"not gzip").is_err());
    }

    #[test]
    fn zip_extraction_ignores_directories() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("ffmpeg-7.0/README.txt", options).unwrap();
        writer.write_all(b"readme").unwrap();
        writer.start_file("ffmpeg-7.0/bin/ffmpeg", options).unwrap();
        writer.write_all(b"binary").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert_eq!(extract_from_zip(&bytes, "ffmpeg").unwrap(), b"binary");
        assert!(extract_from_zip(&bytes, "ffprobe").is_err());
    }
}
