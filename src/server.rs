use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{RawQuery, State},
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::Response,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    config::{Config, FallbackCase, normalize_origin},
    downloader::{DOWNLOAD_FILENAME_HEADER, DirectDownloader, file_response, prune_stale_downloads},
    error::{ApiError, StartupError},
    extractor::{MediaExtractor, YtDlpExtractor, ensure_fetchable_url},
    normalizer::{MediaInfo, normalize},
};

#[derive(Clone)]
pub struct AppState {
    extractor: Arc<dyn MediaExtractor>,
    downloader: DirectDownloader,
    fallback_label: &'static str,
}

impl AppState {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        downloader: DirectDownloader,
        fallback_case: FallbackCase,
    ) -> Self {
        Self {
            extractor,
            downloader,
            fallback_label: fallback_case.label(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let extractor = YtDlpExtractor::new(config.yt_dlp_path.clone(), config.extract_timeout);
        let downloader = DirectDownloader::new(
            config.downloads_dir.clone(),
            config.download_timeout,
            config.download_retention,
        )?;

        Ok(Self::new(Arc::new(extractor), downloader, config.fallback_case))
    }
}

#[derive(Debug, Default, Deserialize)]
struct UrlParams {
    url: Option<String>,
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/extract", get(extract))
        .route("/download", post(download))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn run(config: Config) -> Result<(), StartupError> {
    let state = AppState::from_config(&config)?;
    let cors = build_cors_layer(&config.allowed_origins);

    if !config.download_retention.is_zero() {
        prune_stale_downloads(&config.downloads_dir, config.download_retention).await;
    }

    let app = build_router(state, cors);

    let addr = config.bind_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(
        "Media relay listening on http://{addr} (downloads in {:?})",
        config.downloads_dir
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "server running" }))
}

async fn extract(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<MediaInfo>, ApiError> {
    let url = require_url(url_from_query(query.as_deref()))?;
    ensure_fetchable_url(&url)?;

    let raw = state.extractor.extract(&url).await.inspect_err(|error| {
        warn!("Extraction failed for {url:?}: {}", error.message);
    })?;
    let info = normalize(raw, state.fallback_label);

    debug!(
        "Extracted {} playable format(s) for {url:?}",
        info.formats.len()
    );
    Ok(Json(info))
}

async fn download(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let url = require_url(
        url_from_query(query.as_deref()).or_else(|| url_from_body(&headers, &body)),
    )?;

    let file = state.downloader.fetch(&url).await?;
    file_response(&file).await
}

fn require_url(url: Option<String>) -> Result<String, ApiError> {
    url.ok_or_else(|| ApiError::invalid_request("Missing required parameter: url"))
}

fn url_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "url")
        .and_then(|(_, value)| non_empty(&value))
}

/// Accepts `{"url": ...}` JSON or a `url=...` form body.
fn url_from_body(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
        || body.trim_ascii_start().starts_with(b"{");

    if is_json {
        serde_json::from_slice::<UrlParams>(body)
            .ok()
            .and_then(|params| params.url)
            .and_then(|url| non_empty(&url))
    } else {
        url_from_query(std::str::from_utf8(body).ok())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Any origin when `allowed_origins` is empty, otherwise only the listed ones.
pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.is_empty() {
        info!("CORS: every origin is allowed");
        AllowOrigin::from(Any)
    } else {
        info!(
            "CORS allow-list loaded with {} origin(s): {:?}",
            allowed_origins.len(),
            allowed_origins
        );
        let allowed_origins = Arc::new(allowed_origins.to_vec());
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!("CORS origin check raw={origin:?} normalized={normalized:?} allowed={allowed}");
            allowed
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_read_from_query_string() {
        assert_eq!(
            url_from_query(Some("url=https%3A%2F%2Fhost%2Fa.mp4%3Fx%3D1")),
            Some("https://host/a.mp4?x=1".to_string())
        );
        assert_eq!(url_from_query(Some("other=1")), None);
        assert_eq!(url_from_query(Some("url=%20%20")), None);
        assert_eq!(url_from_query(None), None);
    }

    #[test]
    fn url_is_read_from_json_or_form_body() {
        let mut json_headers = HeaderMap::new();
        json_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert_eq!(
            url_from_body(&json_headers, br#"{"url": "https://host/a.mp4"}"#),
            Some("https://host/a.mp4".to_string())
        );

        assert_eq!(
            url_from_body(&HeaderMap::new(), b"url=https%3A%2F%2Fhost%2Fb.mp4"),
            Some("https://host/b.mp4".to_string())
        );
        assert_eq!(url_from_body(&HeaderMap::new(), b""), None);
        assert_eq!(url_from_body(&json_headers, b"{\"link\": 1}"), None);
    }
}
