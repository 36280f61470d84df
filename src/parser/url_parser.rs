use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::ParseError;

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
];
const SHORT_HOST: &str = "youtu.be";

/// 请求时对 URL 的分类，决定整个下载过程走单曲还是播放列表流程
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlKind {
    Single,
    Playlist { list_id: String },
}

/// 解析并校验视频链接，只接受已知的视频站点链接形态
pub fn parse_video_url(input: &str) -> Result<Url, ParseError> {
    lazy_static! {
        // /shorts/<id>、/embed/<id>、/v/<id>、/live/<id>
        static ref ID_PATH: Regex = Regex::new(r"^/(shorts|embed|v|live)/[0-9A-Za-z_-]+/?$").unwrap();
        static ref SHORT_ID_PATH: Regex = Regex::new(r"^/[0-9A-Za-z_-]+/?$").unwrap();
    }

    let url = Url::parse(input.trim())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ParseError::InvalidUrl(input.to_string()));
    }

    let host = url
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| ParseError::InvalidUrl(input.to_string()))?;
    let path = url.path();

    let recognised = if host == SHORT_HOST {
        SHORT_ID_PATH.is_match(path)
    } else if YOUTUBE_HOSTS.contains(&host.as_str()) {
        match path.trim_end_matches('/') {
            "/watch" => query_value(&url, "v").is_some() || query_value(&url, "list").is_some(),
            "/playlist" => query_value(&url, "list").is_some(),
            _ => ID_PATH.is_match(path),
        }
    } else {
        return Err(ParseError::UnsupportedHost(host));
    };

    if !recognised {
        return Err(ParseError::UnsupportedFormat(input.to_string()));
    }
    Ok(url)
}

/// 纯语法判定：带非空 `list` 参数的 `/watch` 或 `/playlist` 链接视为播放列表
pub fn classify(url: &Url) -> UrlKind {
    let path = url.path().trim_end_matches('/');
    let on_list_path = matches!(path, "/watch" | "/playlist")
        && url
            .host_str()
            .is_some_and(|h| YOUTUBE_HOSTS.contains(&h.to_ascii_lowercase().as_str()));

    match query_value(url, "list") {
        Some(list_id) if on_list_path => UrlKind::Playlist { list_id },
        _ => UrlKind::Single,
    }
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == key && !v.trim().is_empty())
        .map(|(_, v)| v.into_owned())
}
