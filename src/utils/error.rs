//! The `error` module defines the error types used within `wis2files`.
//!
//! Each stage of the pipeline has its own error type so the caller can decide
//! whether a failure is fatal (configuration, subscription) or recovered
//! locally (decode, fetch). `Error` is the top-level type returned to `main`.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for fallible top-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error. Every variant ends the process.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or unloadable settings. Raised before any connection attempt.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate material in {path}: {message}")]
    Certificate { path: PathBuf, message: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// The broker could not be reached. Always retried, never fatal.
#[derive(Debug, Error)]
#[error("failed to connect to broker: {0}")]
pub struct ConnectError(pub String);

/// A request the session issued to the broker client could not be queued.
#[derive(Debug, Error)]
#[error("broker client request failed: {0}")]
pub struct RequestError(pub String);

/// Subscribing to the configured topic failed after a successful connect.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscribe request for '{topic}' failed: {source}")]
    Request {
        topic: String,
        #[source]
        source: RequestError,
    },

    #[error("broker rejected subscription to '{topic}'")]
    Rejected { topic: String },
}

/// A notification payload did not match the expected structure.
#[derive(Debug, Error)]
#[error("malformed notification: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

/// Retrieving a single link failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("bad status {status} from {url}")]
    Status { url: String, status: StatusCode },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot derive a download target from {url}: {reason}")]
    InvalidTarget { url: String, reason: &'static str },

    #[error("failed writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
