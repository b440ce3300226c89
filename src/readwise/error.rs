//! Error types for the Readwise API adapter.

use thiserror::Error;

/// Errors surfaced by [`crate::readwise::ReadwiseClient`].
#[derive(Error, Debug)]
pub enum ApiError {
    /// 401: the API token was rejected. Never retried automatically.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 429: the server asked us to slow down. `retry_after` comes from the
    /// `Retry-After` header, defaulting to 60 seconds when absent.
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// 404: the requested book or highlight does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// 400: the server rejected the request parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// 5xx: the server failed; retried with backoff for GETs.
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// Connection, DNS, or timeout failure below the HTTP layer.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded as the expected JSON shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Map a non-success HTTP status (plus the relevant header/body context)
    /// to the error taxonomy.
    pub fn from_status(status: u16, retry_after: Option<&str>, body: &str) -> Self {
        match status {
            401 => Self::Auth("check your API token".to_string()),
            404 => Self::NotFound("no such resource".to_string()),
            429 => Self::RateLimited {
                retry_after: retry_after.and_then(|v| v.trim().parse().ok()).unwrap_or(60),
            },
            400 => Self::Validation(truncate(body, 500)),
            s if s >= 500 => Self::Server { status: s },
            s => Self::Server { status: s },
        }
    }

    /// True for failures worth retrying on an idempotent GET.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Transport(_))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
