//! Error types shared across the watcher.
//!
//! Errors below the watch loop are converted into classified results
//! ([`crate::source::FetchResult`], [`crate::notify::NotifyResult`]) rather
//! than propagated, so the loop is the only place that decides whether a
//! failure is cycle-local or fatal.

use std::fmt;

use thiserror::Error;

/// Classification of a failed feed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The request did not complete within the configured timeout.
    Timeout,
    /// Connection, DNS or TLS failure.
    Network,
    /// The server answered with a status we cannot use.
    HttpStatus(u16),
    /// The response body could not be read.
    Body,
    /// The body was not a valid RSS document.
    Parse,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Body => write!(f, "body read error"),
            FailureKind::Parse => write!(f, "parse error"),
        }
    }
}

/// A fetch attempt against one candidate URL that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{url}: {kind} ({message})")]
pub struct FetchFailure {
    pub url: String,
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub(crate) fn new(url: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            kind,
            message: message.into(),
        }
    }

    /// Build a failure from a `reqwest` error, separating timeouts from
    /// other network errors.
    pub(crate) fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_body() || err.is_decode() {
            FailureKind::Body
        } else {
            FailureKind::Network
        };
        Self::new(url, kind, err.to_string())
    }
}

/// Persistence failure in the dedup store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to deliver a notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// One or more provider settings are absent.
    #[error("missing notification credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    /// The provider could not be reached.
    #[error("provider request failed: {0}")]
    Http(String),

    /// The provider answered with an error status.
    #[error("provider rejected request (status {status}): {message}")]
    Provider { status: u16, message: String },
}

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    Missing(&'static str),

    #[error("invalid filter pattern: {0}")]
    Filter(#[from] regex::Error),
}
