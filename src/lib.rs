//! HTTP relay that lists the downloadable formats of a media page through
//! yt-dlp and streams direct file URLs to local storage.

pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ErrorKind, StartupError};
pub use server::{AppState, build_cors_layer, build_router, run};
