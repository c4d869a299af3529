use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Whole-repository failures. Anything per-file is skipped, not raised.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("repository root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("repository root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("index build task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode cache entry: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported cache format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("cached index is inconsistent: {0}")]
    Inconsistent(String),

    #[error("cache store error: {0}")]
    Store(String),
}

impl From<mongodb::error::Error> for CacheError {
    fn from(e: mongodb::error::Error) -> Self {
        CacheError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("snippet search timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Rejections produced while parsing an untrusted issue claim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClaimError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("file path is empty")]
    EmptyFile,

    #[error("line must be >= 1, got {0}")]
    InvalidLine(i64),

    #[error("line is not a number: {0}")]
    MalformedLine(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("declared confidence must be within 0..=100, got {0}")]
    InvalidConfidence(f64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::GitError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Index(IndexError::RootNotFound(_))
            | ApiError::Index(IndexError::RootNotDirectory(_))
            | ApiError::Index(IndexError::InvalidPattern { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Index(IndexError::TaskFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::GitError(_) => "GIT_ERROR",
            ApiError::Index(_) => "INDEX_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: None,
        })
    }
}
