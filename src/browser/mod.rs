//! Browser capability surface consumed by the session driver.
//!
//! The crawl engine never talks to a browser directly. It drives a
//! [`BrowserSession`], an object-safe async trait covering navigation,
//! network capture, DOM queries, clicks, scrolling, script evaluation and
//! download tracking. A [`BrowserLauncher`] creates one exclusive session per
//! driver.
//!
//! # Backends
//!
//! - `chromium` (cargo feature) - Chrome DevTools Protocol via `chromiumoxide`
//!
//! Tests use a scripted in-memory implementation.

#[cfg(feature = "chromium")]
pub mod chromium;
mod error;
mod locator;

pub use error::BrowserError;
pub use locator::Locator;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::download::RequestContext;

/// Opaque handle to an element found by a session.
///
/// Only meaningful to the session that returned it, and only until the next
/// navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tracked network response observed by the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedResponse {
    /// Request URL.
    pub url: String,
    /// Parsed JSON body, when the body was retrievable and valid JSON.
    pub body: Option<Value>,
    /// Headers and cookies of the originating request.
    pub request: RequestContext,
}

impl CapturedResponse {
    /// The body's non-null, non-empty `data` field.
    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        let data = self.body.as_ref()?.get("data")?;
        let usable = match data {
            Value::Null | Value::Bool(false) => false,
            Value::Object(map) => !map.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        };
        usable.then_some(data)
    }
}

/// What to do when the download target file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IfExists {
    /// Keep the existing file; the download reports [`DownloadState::Skipped`].
    #[default]
    Skip,
    /// Replace the existing file.
    Overwrite,
}

/// Where the next browser download should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Destination directory.
    pub dir: PathBuf,
    /// File name without extension; the browser keeps the served extension.
    pub file_name: String,
    /// Collision policy.
    pub if_exists: IfExists,
}

/// Handle of a started browser download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadId(pub String);

/// Lifecycle state of a browser download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Still transferring.
    InProgress,
    /// Finished and written to disk.
    Completed,
    /// Not written because the target already existed.
    Skipped,
    /// Cancelled by the page or the user.
    Canceled,
    /// Failed mid-transfer.
    Interrupted,
}

/// Snapshot of a browser download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStatus {
    /// Current state.
    pub state: DownloadState,
    /// Final local path, once written.
    pub final_path: Option<PathBuf>,
    /// Source URL the browser fetched.
    pub url: String,
}

impl DownloadStatus {
    /// Returns `true` once the download left [`DownloadState::InProgress`].
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state != DownloadState::InProgress
    }
}

/// One exclusively owned browser session.
///
/// Implementations track requests matching the listing endpoint from the
/// moment they are created.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigates to `url`.
    async fn open(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Reloads the current page.
    async fn reload(&mut self) -> Result<(), BrowserError>;

    /// Number of tracked requests still in flight.
    async fn pending_requests(&mut self) -> Result<usize, BrowserError>;

    /// Removes and returns every tracked response captured so far.
    async fn drain_responses(&mut self) -> Result<Vec<CapturedResponse>, BrowserError>;

    /// All elements matching `locator`, waiting up to `timeout` for the first.
    ///
    /// An empty vector means nothing matched in time.
    async fn find_all(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError>;

    /// Like [`find_all`](Self::find_all) but searches inside `scope`
    /// (including a same-origin frame's document).
    async fn find_within(
        &mut self,
        scope: &ElementRef,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError>;

    /// First match of `locator`, if any.
    async fn find_first(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Option<ElementRef>, BrowserError> {
        Ok(self.find_all(locator, timeout).await?.into_iter().next())
    }

    /// Left-clicks `element`.
    async fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError>;

    /// Opens the context menu on `element`.
    async fn context_click(&mut self, element: &ElementRef) -> Result<(), BrowserError>;

    /// Visible text of `element`.
    async fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError>;

    /// Scrolls the page so `element` is visible.
    async fn scroll_into_view(&mut self, element: &ElementRef) -> Result<(), BrowserError>;

    /// Sets the vertical scroll offset of the scrollable `element`.
    async fn scroll_element_to(&mut self, element: &ElementRef, y: i64)
    -> Result<(), BrowserError>;

    /// Evaluates `script` and returns its JSON result.
    async fn run_script(&mut self, script: &str) -> Result<Value, BrowserError>;

    /// Sets where the next download lands.
    async fn configure_download(&mut self, target: &DownloadTarget) -> Result<(), BrowserError>;

    /// Waits up to `timeout` for a download to start.
    async fn wait_download_start(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<DownloadId>, BrowserError>;

    /// Current status of a started download.
    async fn download_status(&mut self, id: &DownloadId) -> Result<DownloadStatus, BrowserError>;

    /// Closes the session and releases the browser.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Creates browser sessions for the orchestrator.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launches session number `index` with its own isolated profile.
    async fn launch(&self, index: usize) -> Result<Box<dyn BrowserSession>, BrowserError>;
}
