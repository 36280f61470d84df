pub mod transcode;

pub use transcode::{convert_to_mp3, probe_duration, sanitize_filename};
