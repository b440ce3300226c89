//! Readwise API adapter: authenticated, paginated read access to the
//! `books` and `highlights` collections.
//!
//! The [`RemoteSource`] trait is the seam between the sync engine and the
//! network: the engine only ever sees lazy streams and typed errors, so
//! tests drive it with a scripted mock instead of HTTP.

pub mod error;
pub mod models;

pub use error::ApiError;

use models::{Book, BookFilter, Highlight, HighlightFilter, Page};

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;

use crate::retry::{with_retries, RetryDecision, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://readwise.io/api/v2";

/// Read access to the remote collections.
///
/// Listing streams are lazy, finite, and single-pass: each page is fetched
/// on demand as the stream is polled, and a consumed stream cannot be
/// restarted.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// All books matching the filter, across every page.
    fn books(&self, filter: BookFilter) -> BoxStream<'_, Result<Book, ApiError>>;

    /// All highlights matching the filter, across every page.
    fn highlights(&self, filter: HighlightFilter) -> BoxStream<'_, Result<Highlight, ApiError>>;

    /// Fetch a single book by id.
    async fn book(&self, id: i64) -> Result<Book, ApiError>;

    /// Fetch a single highlight by id.
    async fn highlight(&self, id: i64) -> Result<Highlight, ApiError>;
}

/// Connection settings for [`ReadwiseClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_token: String,
    pub base_url: String,
    pub timeout: Duration,
    pub page_size: u32,
    pub retry: RetryPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            page_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// HTTP client for the Readwise REST API.
///
/// The underlying `reqwest::Client` holds a shared connection pool and is
/// cheap to clone; auth travels as a default `Authorization: Token ...`
/// header on every request.
pub struct ReadwiseClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ReadwiseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadwiseClient")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

enum PageCursor {
    Start { path: &'static str, query: Vec<(String, String)> },
    Next(String),
    Done,
}

impl ReadwiseClient {
    pub fn new(options: ClientOptions) -> Result<Self, ApiError> {
        if options.api_token.is_empty() {
            return Err(ApiError::Auth(
                "API token is required; set READWISE_API_KEY or pass --api-token".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = reqwest::header::HeaderValue::from_str(&format!("Token {}", options.api_token))
            .map_err(|_| ApiError::Auth("API token contains invalid characters".to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("readwise-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            page_size: options.page_size,
            retry: options.retry,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// One GET with status mapping; no retries at this layer.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, ApiError> {
        let mut req = self.http.get(url);
        if !query.is_empty() {
            req = req.query(query);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(
                status.as_u16(),
                retry_after.as_deref(),
                &body,
            ));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// GET with transport-level retries. Safe only for idempotent reads,
    /// which is all this adapter issues.
    async fn get_with_retries<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<T, ApiError> {
        with_retries(
            &self.retry,
            |e: &ApiError| {
                if e.is_transient() {
                    RetryDecision::Retry
                } else {
                    RetryDecision::Abort
                }
            },
            || self.get_json::<T>(url, query),
        )
        .await
    }

    /// Lazily walk a paginated listing, following the server-supplied `next`
    /// URL until exhausted.
    fn paged<T>(
        &self,
        path: &'static str,
        query: Vec<(String, String)>,
    ) -> BoxStream<'_, Result<T, ApiError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        stream::try_unfold(
            (self, PageCursor::Start { path, query }),
            |(client, cursor)| async move {
                let page: Page<T> = match cursor {
                    PageCursor::Done => return Ok(None),
                    PageCursor::Start { path, query } => {
                        client.get_with_retries(&client.endpoint(path), &query).await?
                    }
                    PageCursor::Next(url) => client.get_with_retries(&url, &[]).await?,
                };

                tracing::debug!(
                    results = page.results.len(),
                    has_next = page.next.is_some(),
                    "Fetched page"
                );

                let next = match page.next {
                    // `next` already carries the filter query string.
                    Some(url) => PageCursor::Next(url),
                    None => PageCursor::Done,
                };
                let items = stream::iter(page.results.into_iter().map(Ok::<T, ApiError>));
                Ok::<_, ApiError>(Some((items, (client, next))))
            },
        )
        .try_flatten()
        .boxed()
    }
}

#[async_trait]
impl RemoteSource for ReadwiseClient {
    fn books(&self, filter: BookFilter) -> BoxStream<'_, Result<Book, ApiError>> {
        let mut query = vec![("page_size".to_string(), self.page_size.to_string())];
        if let Some(ts) = filter.updated_after {
            query.push(("updated__gt".to_string(), ts.to_rfc3339()));
        }
        self.paged("books/", query)
    }

    fn highlights(&self, filter: HighlightFilter) -> BoxStream<'_, Result<Highlight, ApiError>> {
        let mut query = vec![("page_size".to_string(), self.page_size.to_string())];
        if let Some(ts) = filter.updated_after {
            query.push(("updated__gt".to_string(), ts.to_rfc3339()));
        }
        if let Some(ts) = filter.highlighted_after {
            query.push(("highlighted_at__gt".to_string(), ts.to_rfc3339()));
        }
        if let Some(book_id) = filter.book_id {
            query.push(("book_id".to_string(), book_id.to_string()));
        }
        self.paged("highlights/", query)
    }

    async fn book(&self, id: i64) -> Result<Book, ApiError> {
        self.get_with_retries(&self.endpoint(&format!("books/{id}/")), &[])
            .await
    }

    async fn highlight(&self, id: i64) -> Result<Highlight, ApiError> {
        self.get_with_retries(&self.endpoint(&format!("highlights/{id}/")), &[])
            .await
    }
}
