// moaswatch/src/error.rs
//
// Typed errors for the archive codec and the metadata provider.
// Orchestration code (main, enrichment pool) wraps these in anyhow.

use std::path::PathBuf;

/// Errors reading or parsing archived interval / session records.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error on {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("invalid interval identifier: {0}")]
    InvalidIntervalId(String),
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField { field, value: value.into() }
    }
}

/// Errors from the ASN metadata provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {message}")]
    Transport { message: String, transient: bool },

    #[error("HTTP status {code}")]
    Status { code: u16 },

    #[error("decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether another attempt may succeed. Connection failures, timeouts and
    /// every non-2xx status are retried; an undecodable payload is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::Status { .. } => true,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::Status { code: status.as_u16() };
        }
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        Self::Transport {
            message:   e.to_string(),
            transient: e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
        }
    }
}
