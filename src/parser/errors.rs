use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("无效的URL: {0}")]
    InvalidUrl(String),
    #[error("不支持的站点: {0}")]
    UnsupportedHost(String),
    #[error("无法识别的视频链接格式: {0}")]
    UnsupportedFormat(String),
    #[error("不支持的码率: {0}kbps（可选 128、192、320）")]
    InvalidBitrate(u32),
}

impl From<url::ParseError> for ParseError {
    fn from(err: url::ParseError) -> Self {
        ParseError::InvalidUrl(err.to_string())
    }
}
