//! Out-of-browser HTTP paths: fallback downloads and their plumbing.
//!
//! # Features
//!
//! - Replays of captured browser requests with sanitized headers and cookies
//! - Streaming writes with cleanup of partial files
//! - Fixed-budget retry policy shared with the listing replayer
//! - Filename sanitization for everything that lands on disk
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::download::{HttpClient, RequestContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let listing = client
//!     .get_json("https://example.com/box/api/v2/dentry/list?dentryUuid=u1", &RequestContext::default())
//!     .await?;
//! println!("{listing}");
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod fallback;
mod filename;
mod headers;
mod retry;

pub use client::HttpClient;
pub use error::DownloadError;
pub use fallback::{DownloadTask, FALLBACK_FAILURE_REASON, FallbackDownloader, FallbackOutcome};
pub use filename::{
    clean_filename, clean_optional_filename, extension_of, filename_from_url, sanitized_path,
    strip_extension,
};
pub use headers::{RequestContext, normalize_cookies, normalize_headers};
pub use retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryDecision, RetryPolicy};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
