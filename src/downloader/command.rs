use std::ffi::OsString;
use std::path::Path;

use crate::common::models::DownloadRequest;
use crate::deps::ToolBinaries;
use crate::process::CommandSpec;

pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// 下载器的完整命令行：一个进程完成抓取与转码
pub fn downloader_command(binaries: &ToolBinaries, request: &DownloadRequest) -> CommandSpec {
    let playlist_flag = if request.is_playlist() {
        "--yes-playlist"
    } else {
        "--no-playlist"
    };

    CommandSpec::new(&binaries.downloader.path)
        .args(["--newline", "--no-colors", playlist_flag])
        .args(["-f", "bestaudio/best", "-x", "--audio-format", "mp3"])
        .arg("--audio-quality")
        .arg(format!("{}K", request.bitrate().kbps()))
        .arg("--ffmpeg-location")
        .arg(binaries.transcoder.path.as_os_str())
        .arg("--no-overwrites")
        .arg("-o")
        .arg(output_template(request.output_folder()))
        .arg(request.url())
        .current_dir(request.output_folder())
}

pub fn output_template(folder: &Path) -> OsString {
    folder.join(OUTPUT_TEMPLATE).into_os_string()
}
