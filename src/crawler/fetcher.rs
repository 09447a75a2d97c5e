//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the shared HTTP client for the crawl identity
//! - GET requests for pages, with content-type gating
//! - Head-only downloads that stop once the document body starts
//! - Error classification into transport failures

use crate::crawler::extract::extract_detached;
use crate::crawler::job::Job;
use crate::storage::FieldMap;
use crate::CrawlError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONNECTION, CONTENT_TYPE};
use reqwest::{redirect::Policy, Client, Response};
use std::sync::Arc;
use std::time::Duration;

const BODY_MARKER: &[u8] = b"<body";
const HEAD_CLOSE: &str = "<body></body></html>";

/// Fetches one page and extracts its fields
///
/// The worker pool only sees this trait, so tests can substitute
/// instrumented fetchers.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch(&self, job: &Job) -> Result<FieldMap, CrawlError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The crawl identity
/// * `timeout` - Whole-request timeout
/// * `max_redirects` - Redirect hops followed before failing
///
/// # Example
///
/// ```no_run
/// use screep::crawler::build_http_client;
/// use std::time::Duration;
///
/// let client = build_http_client("ScreepBot/1.0", Duration::from_secs(15), 8).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &str,
    timeout: Duration,
    max_redirects: usize,
) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .redirect(Policy::limited(max_redirects))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Prefixes scheme-less targets with `http://`
pub fn normalize_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Page fetcher over a shared reqwest client
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetch for HttpPageFetcher {
    async fn fetch(&self, job: &Job) -> Result<FieldMap, CrawlError> {
        let url = normalize_url(&job.url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CrawlError::transport(&url, e))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if !is_parseable(&content_type) {
            tracing::debug!(url = %url, content_type = %content_type, "Skipping non-text content");
            return Ok(FieldMap::new());
        }

        let body = if job.head_only {
            read_head(response, &url).await?
        } else {
            response
                .text()
                .await
                .map_err(|e| CrawlError::transport(&url, e))?
        };

        // Parsing is CPU-bound, keep it off the runtime so the job deadline can fire
        extract_detached(url, body, Arc::clone(&job.rules)).await
    }
}

fn is_parseable(content_type: &str) -> bool {
    content_type.contains("html") || content_type.contains("xml") || content_type.contains("text")
}

/// Reads the body until `<body` shows up and closes the document after the head
async fn read_head(mut response: Response, url: &str) -> Result<String, CrawlError> {
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| CrawlError::transport(url, e))?
    {
        // The marker may straddle two chunks
        let search_from = buf.len().saturating_sub(BODY_MARKER.len() - 1);
        buf.extend_from_slice(&chunk);

        if let Some(pos) = find_body_start(&buf[search_from..]) {
            buf.truncate(search_from + pos);
            let mut head = String::from_utf8_lossy(&buf).into_owned();
            head.push_str(HEAD_CLOSE);
            return Ok(head);
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Case-insensitive position of `<body`
fn find_body_start(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(BODY_MARKER.len())
        .position(|w| w.eq_ignore_ascii_case(BODY_MARKER))
}
