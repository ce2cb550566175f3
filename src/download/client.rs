//! HTTP client wrapper for requests replayed outside the browser.
//!
//! This module provides the `HttpClient` struct used by the fallback
//! downloader and the listing replayer. Every request carries the headers and
//! cookies captured from an authenticated browser request.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Proxy, StatusCode};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::headers::RequestContext;

/// User-Agent sent when the captured headers carry none.
const DEFAULT_USER_AGENT: &str = concat!("harvester/", env!("CARGO_PKG_VERSION"));

/// HTTP client for replaying captured requests.
///
/// Create once and share; the underlying `reqwest::Client` pools connections.
///
/// # Example
///
/// ```no_run
/// use harvester_core::download::{HttpClient, RequestContext};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let ctx = RequestContext::default();
/// let bytes = client
///     .download_to_path("https://example.com/file.pdf", &ctx, Path::new("./out/file.pdf"))
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes
    /// - Gzip decompression: enabled
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the supplied configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = build_client(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Sends a GET for `url` with the captured headers and cookies.
    ///
    /// Anything other than HTTP 200 is an error.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the URL is invalid, the request fails, or the
    /// status is not 200.
    #[instrument(level = "debug", skip(self, ctx), fields(url = %url))]
    pub async fn get(
        &self,
        url: &str,
        ctx: &RequestContext,
    ) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .headers(header_map(ctx))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::network(url, e)
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "non-200 response");
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// Fetches `url` and parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`get`](Self::get), or `Payload` when the body is
    /// not valid JSON.
    #[instrument(level = "debug", skip(self, ctx), fields(url = %url))]
    pub async fn get_json(&self, url: &str, ctx: &RequestContext) -> Result<Value, DownloadError> {
        let response = self.get(url, ctx).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        serde_json::from_slice(&body).map_err(|e| DownloadError::payload(url, e.to_string()))
    }

    /// Fetches `url` and streams the body to `path`, returning bytes written.
    ///
    /// A partially written file is removed when the transfer fails.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`get`](Self::get), or `Io`/`Network` while
    /// streaming the body.
    #[instrument(skip(self, ctx), fields(url = %url, path = %path.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        ctx: &RequestContext,
        path: &Path,
    ) -> Result<u64, DownloadError> {
        let response = self.get(url, ctx).await?;

        let mut file = File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;

        let result = stream_to_file(&mut file, response, url, path).await;
        if result.is_err() {
            debug!("cleaning up partial file after error");
            let _ = tokio::fs::remove_file(path).await;
        }
        let bytes = result?;

        info!(bytes, "download complete");
        Ok(bytes)
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

/// Converts the captured context into a `HeaderMap`.
///
/// Names or values `reqwest` rejects are skipped.
fn header_map(ctx: &RequestContext) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in ctx.replay_headers() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!(header = %name, "skipping header that cannot be replayed"),
        }
    }
    if let Some(cookie) = ctx.cookie_header() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                map.insert(COOKIE, value);
            }
            Err(_) => warn!("captured cookies contain bytes not valid in a header"),
        }
    }
    map
}

fn build_client(
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(DEFAULT_USER_AGENT);
    apply_env_proxy(builder).build()
}

fn apply_env_proxy(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
