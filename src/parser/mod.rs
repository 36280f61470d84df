pub mod errors;
pub mod progress;
pub mod url_parser;

pub use errors::ParseError;
pub use progress::{ParseContext, ParseMode, parse_line};
pub use url_parser::{UrlKind, classify, parse_video_url};
