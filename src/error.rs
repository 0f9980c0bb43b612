use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Closed set of failure classes the relay reports to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is unusable (missing or blank `url`).
    InvalidRequest,
    /// The extraction engine could not describe the source.
    UnsupportedSource,
    /// The direct-download target answered with a non-200 status.
    UpstreamRejected,
    /// Network failure or timeout while talking to the direct-download target.
    TransportFailure,
    /// Local disk or directory failure.
    StorageFailure,
    /// The extraction engine executable is missing or could not be started.
    EngineUnavailable,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::InvalidRequest | Self::UnsupportedSource | Self::UpstreamRejected => {
                StatusCode::BAD_REQUEST
            }
            Self::TransportFailure => StatusCode::BAD_GATEWAY,
            Self::StorageFailure | Self::EngineUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UnsupportedSource => "UNSUPPORTED_SOURCE",
            Self::UpstreamRejected => "UPSTREAM_REJECTED",
            Self::TransportFailure => "TRANSPORT_FAILURE",
            Self::StorageFailure => "STORAGE_FAILURE",
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn unsupported_source(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedSource, message)
    }

    pub fn upstream_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamRejected, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailure, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFailure, message)
    }

    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineUnavailable, message)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

/// Failures that stop the service before or while it serves.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid origin in ALLOWED_ORIGINS: {0} (use values like https://example.com)")]
    InvalidOrigin(String),
    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(std::io::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            detail: &self.message,
            code: self.kind.code(),
        });

        (self.status(), body).into_response()
    }
}
