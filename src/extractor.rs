use std::{io::ErrorKind as IoErrorKind, path::PathBuf, process::Output, time::Duration};

use async_trait::async_trait;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};
use url::Url;

use crate::{error::ApiError, normalizer::RawMediaInfo};

/// Anything able to describe the downloadable variants behind a page URL.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<RawMediaInfo, ApiError>;
}

/// Runs yt-dlp as a subprocess in metadata-only mode.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn args(url: &str) -> Vec<String> {
        vec![
            "-J".to_string(),
            "--skip-download".to_string(),
            "--no-check-certificates".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ]
    }

    async fn run(&self, url: &str) -> Result<Output, ApiError> {
        let command_future = Command::new(&self.binary)
            .args(Self::args(url))
            .kill_on_drop(true)
            .output();

        let output = timeout(self.timeout, command_future)
            .await
            .map_err(|_| {
                ApiError::unsupported_source(format!(
                    "Extraction timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|error| {
                if error.kind() == IoErrorKind::NotFound {
                    ApiError::engine_unavailable(format!(
                        "yt-dlp executable not found at {:?}. Install yt-dlp or set YT_DLP_PATH.",
                        self.binary
                    ))
                } else {
                    ApiError::engine_unavailable(format!("Could not run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            return Err(ApiError::unsupported_source(run_error_message(
                &output.stderr,
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str) -> Result<RawMediaInfo, ApiError> {
        debug!("Running yt-dlp for {url:?}");
        let output = self.run(url).await?;
        parse_engine_output(&output.stdout)
    }
}

pub fn parse_engine_output(stdout: &[u8]) -> Result<RawMediaInfo, ApiError> {
    serde_json::from_slice(stdout).map_err(|error| {
        warn!("yt-dlp produced unreadable JSON: {error}");
        ApiError::unsupported_source(format!("Could not read extraction result: {error}"))
    })
}

/// Last non-empty stderr line, which is where yt-dlp puts the `ERROR:` message.
pub fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not extract this URL")
        .to_string()
}

/// Only absolute http(s) URLs with a host are handed to the engine or fetched.
pub fn is_fetchable_url(input: &str) -> bool {
    let Ok(parsed) = Url::parse(input) else {
        return false;
    };

    matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
}

pub fn ensure_fetchable_url(input: &str) -> Result<(), ApiError> {
    if is_fetchable_url(input) {
        Ok(())
    } else {
        Err(ApiError::unsupported_source(format!(
            "Unsupported URL: {input}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn only_http_urls_are_fetchable() {
        assert!(is_fetchable_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_fetchable_url("http://10.0.0.2:8080/file.mp4"));
        assert!(!is_fetchable_url("ftp://example.com/file.mp4"));
        assert!(!is_fetchable_url("file:///etc/passwd"));
        assert!(!is_fetchable_url("not a url"));
        assert!(!is_fetchable_url(""));
    }

    #[test]
    fn error_message_is_last_stderr_line() {
        let stderr = b"WARNING: something odd\n\nERROR: [generic] Unsupported URL: https://example.com\n\n";
        assert_eq!(
            run_error_message(stderr),
            "ERROR: [generic] Unsupported URL: https://example.com"
        );
        assert_eq!(run_error_message(b""), "yt-dlp could not extract this URL");
    }

    #[test]
    fn garbage_output_is_an_unsupported_source() {
        let error = parse_engine_output(b"<html>").unwrap_err();
        assert_eq!(error.kind, ErrorKind::UnsupportedSource);
        assert!(!error.message.is_empty());
    }

    #[test]
    fn engine_arguments_skip_download_and_certificates() {
        let args = YtDlpExtractor::args("https://example.com/v");
        assert!(args.contains(&"--skip-download".to_string()));
        assert!(args.contains(&"--no-check-certificates".to_string()));
        assert!(args.contains(&"--quiet".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
    }

    #[tokio::test]
    async fn missing_engine_is_reported_as_unavailable() {
        let extractor = YtDlpExtractor::new("/nonexistent/yt-dlp", Duration::from_secs(5));
        let error = extractor
            .extract("https://example.com/clip")
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::EngineUnavailable);
    }
}
