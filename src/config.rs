use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::error::StartupError;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_YT_DLP_PATH: &str = "yt-dlp";
pub const DEFAULT_EXTRACT_TIMEOUT_SECONDS: u64 = 180;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECONDS: u64 = 60;

/// Casing of the literal used when no quality label can be derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackCase {
    #[default]
    Capitalized,
    Lower,
}

impl FallbackCase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Capitalized => "Unknown",
            Self::Lower => "unknown",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "capitalized" | "upper" | "title" => Some(Self::Capitalized),
            "lower" | "lowercase" => Some(Self::Lower),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub downloads_dir: PathBuf,
    pub yt_dlp_path: PathBuf,
    pub extract_timeout: Duration,
    pub download_timeout: Duration,
    pub fallback_case: FallbackCase,
    /// Normalized origins. Empty means every origin is allowed.
    pub allowed_origins: Vec<String>,
    /// Zero keeps downloaded files forever.
    pub download_retention: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            downloads_dir: PathBuf::from(DEFAULT_DOWNLOADS_DIR),
            yt_dlp_path: PathBuf::from(DEFAULT_YT_DLP_PATH),
            extract_timeout: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECONDS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECONDS),
            fallback_case: FallbackCase::default(),
            allowed_origins: Vec::new(),
            download_retention: Duration::ZERO,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, StartupError> {
        let defaults = Self::default();

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|value| parse_allowed_origins(&value))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr: resolve_bind_addr(),
            downloads_dir: read_string_env("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_dir),
            yt_dlp_path: read_string_env("YT_DLP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.yt_dlp_path),
            extract_timeout: read_u64_env("EXTRACT_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.extract_timeout),
            download_timeout: read_u64_env("DOWNLOAD_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            fallback_case: read_string_env("QUALITY_FALLBACK_CASE")
                .and_then(|value| FallbackCase::parse(&value))
                .unwrap_or(defaults.fallback_case),
            allowed_origins,
            download_retention: read_u64_env("DOWNLOAD_RETENTION_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_retention),
        })
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

pub fn parse_allowed_origins(value: &str) -> Result<Vec<String>, StartupError> {
    let mut origins = Vec::new();
    for origin in value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
    {
        let normalized = normalize_origin(origin)
            .ok_or_else(|| StartupError::InvalidOrigin(origin.to_string()))?;
        if !origins.contains(&normalized) {
            origins.push(normalized);
        }
    }
    Ok(origins)
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
