use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::pin,
    time::{Duration, SystemTime},
};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    error::{ApiError, StartupError},
    extractor::ensure_fetchable_url,
};

pub const DOWNLOAD_CHUNK_BYTES: usize = 512 * 1024;
pub const DOWNLOAD_FILENAME_HEADER: &str = "x-download-filename";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub source_url: String,
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Streams remote files into the shared downloads directory.
#[derive(Debug, Clone)]
pub struct DirectDownloader {
    client: reqwest::Client,
    downloads_dir: PathBuf,
    retention: Duration,
}

impl DirectDownloader {
    pub fn new(
        downloads_dir: impl Into<PathBuf>,
        fetch_timeout: Duration,
        retention: Duration,
    ) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;

        Ok(Self {
            client,
            downloads_dir: downloads_dir.into(),
            retention,
        })
    }

    /// Fetches `url` completely and stores it under its derived name.
    ///
    /// The upstream status is checked before anything is written. The body
    /// lands in a hidden part file that only replaces the destination once it
    /// is complete, so failures never leave empty or truncated files behind.
    pub async fn fetch(&self, url: &str) -> Result<DownloadedFile, ApiError> {
        ensure_fetchable_url(url)?;

        tokio::fs::create_dir_all(&self.downloads_dir)
            .await
            .map_err(|error| {
                warn!(
                    "Could not create downloads directory {:?}: {error}",
                    self.downloads_dir
                );
                ApiError::storage(format!("Could not create downloads directory: {error}"))
            })?;

        if !self.retention.is_zero() {
            prune_stale_downloads(&self.downloads_dir, self.retention).await;
        }

        let response = self.client.get(url).send().await.map_err(|error| {
            warn!("Direct download request to {url:?} failed: {error}");
            ApiError::transport(format!("Could not reach {url}: {error}"))
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Direct download of {url:?} rejected upstream with {status}");
            return Err(ApiError::upstream_rejected(format!(
                "Upstream responded with status {status}"
            )));
        }

        let file_name = derive_file_name(url);
        let destination = self.downloads_dir.join(&file_name);
        let part_path = self
            .downloads_dir
            .join(format!(".{}.part", Uuid::new_v4().simple()));

        let written = match write_body(response, &part_path, &file_name).await {
            Ok(written) => written,
            Err(error) => {
                remove_part_file(&part_path).await;
                return Err(error);
            }
        };

        if let Err(error) = tokio::fs::rename(&part_path, &destination).await {
            warn!("Could not move {part_path:?} to {destination:?}: {error}");
            remove_part_file(&part_path).await;
            return Err(ApiError::storage(format!(
                "Could not store {file_name}: {error}"
            )));
        }

        let file = DownloadedFile {
            source_url: url.to_string(),
            file_name,
            path: destination,
            size: written,
        };
        info!(
            "Stored {} bytes from {:?} as {:?}",
            file.size, file.source_url, file.path
        );

        Ok(file)
    }
}

/// Storage errors name only `file_name`; server paths stay in the logs.
async fn write_body(
    response: reqwest::Response,
    part_path: &Path,
    file_name: &str,
) -> Result<u64, ApiError> {
    let mut file = File::create(part_path).await.map_err(|error| {
        warn!("Could not create {part_path:?}: {error}");
        ApiError::storage(format!("Could not create {file_name}: {error}"))
    })?;

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    let mut reader = pin!(StreamReader::new(stream));
    let mut buffer = vec![0_u8; DOWNLOAD_CHUNK_BYTES];
    let mut written = 0_u64;

    loop {
        let read = reader.read(&mut buffer).await.map_err(|error| {
            ApiError::transport(format!("Transfer interrupted: {error}"))
        })?;
        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read]).await.map_err(|error| {
            warn!("Could not write {part_path:?}: {error}");
            ApiError::storage(format!("Could not write {file_name}: {error}"))
        })?;
        written += read as u64;
    }

    file.flush().await.map_err(|error| {
        warn!("Could not flush {part_path:?}: {error}");
        ApiError::storage(format!("Could not write {file_name}: {error}"))
    })?;

    Ok(written)
}

async fn remove_part_file(part_path: &Path) {
    if let Err(error) = tokio::fs::remove_file(part_path).await
        && error.kind() != ErrorKind::NotFound
    {
        warn!("Could not remove partial download {part_path:?}: {error}");
    }
}

/// Streams a stored file back as an `application/octet-stream` attachment.
pub async fn file_response(file: &DownloadedFile) -> Result<Response, ApiError> {
    let handle = File::open(&file.path).await.map_err(|error| {
        warn!("Could not open {:?}: {error}", file.path);
        ApiError::storage(format!("Could not open {}: {error}", file.file_name))
    })?;
    let content_length = handle
        .metadata()
        .await
        .map(|metadata| metadata.len())
        .unwrap_or(file.size);

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(content_length));

    let content_disposition = build_content_disposition(&file.file_name);
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition)
            .map_err(|_| ApiError::storage("Could not build the download header."))?,
    );
    headers.insert(
        HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        HeaderValue::from_str(&sanitize_ascii_filename(&file.file_name))
            .map_err(|_| ApiError::storage("Could not build the file name header."))?,
    );

    let body = Body::from_stream(ReaderStream::new(handle));
    Ok((headers, body).into_response())
}

/// Last path segment of `url` without query or fragment, or a generated
/// `file_<uuid>` name when that segment is empty or not a plain file name.
pub fn derive_file_name(url: &str) -> String {
    let segment = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .map(ToString::to_string)
        })
        .map(|segment| {
            urlencoding::decode(&segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(segment)
        })
        .unwrap_or_default();

    let name = segment.trim();
    if is_plain_file_name(name) {
        name.to_string()
    } else {
        generated_file_name()
    }
}

pub fn generated_file_name() -> String {
    format!("file_{}", Uuid::new_v4())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

pub fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

/// Deletes regular files in `dir` whose modification time is older than `max_age`.
pub async fn prune_stale_downloads(dir: &Path, max_age: Duration) {
    if max_age.is_zero() {
        return;
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open downloads directory for pruning: {error}");
            }
            return;
        }
    };

    let now = SystemTime::now();

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate downloads directory for pruning: {error}");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(error) => {
                warn!("Could not read metadata of {path:?}: {error}");
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Pruned stale download {path:?}"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove stale download {path:?}: {error}"),
        }
    }
}
