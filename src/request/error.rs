//! Error types for the request module.
//!
//! This module defines structured errors for outbound HTTP calls, providing
//! context-rich messages for debugging and user feedback.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while issuing archive requests.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The server rate-limited the request and automatic backoff is disabled.
    ///
    /// With the default configuration this never surfaces: the requester
    /// absorbs 429 responses by sleeping for the server's hint and retrying.
    #[error("rate limited requesting {url} (retry after {retry_after:?})")]
    RateLimited {
        /// The URL that was throttled.
        url: String,
        /// The server's retry hint, if it sent one.
        retry_after: Option<Duration>,
    },
}

impl RequestError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a rate-limited error.
    pub fn rate_limited(url: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            url: url.into(),
            retry_after,
        }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` because our error
// variants require context (the url) that the source error does not always
// carry. The helper constructors are the correct pattern here.
