// Concrete implementations of the capability traits

pub mod chrome;
pub mod ffmpeg;
pub mod http;

pub use chrome::ChromeRenderer;
pub use ffmpeg::FfmpegRunner;
pub use http::HttpFetcher;
