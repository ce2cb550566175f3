//! [`BrowserSession`] backed by Chrome over the DevTools protocol.
//!
//! Each session launches its own Chrome with an isolated profile directory
//! and debug port. Elements are located in page JavaScript and kept in a
//! per-page registry, so an [`ElementRef`] is an index into that registry.
//! Listing requests and downloads are observed through protocol events on
//! background tasks.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, GetResponseBodyParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    BrowserError, BrowserLauncher, BrowserSession, CapturedResponse, DownloadId, DownloadState,
    DownloadStatus, DownloadTarget, ElementRef, IfExists, Locator,
};
use crate::config::LISTING_LISTEN_PATTERN;
use crate::download::RequestContext;
use crate::session::BoundedWait;

/// Poll interval of element lookups.
const FIND_POLL: Duration = Duration::from_millis(200);

/// How a launcher starts Chrome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Parent of the per-session profile directories (`data{idx}`).
    pub profile_root: PathBuf,
    /// Debug port of session 0; session `i` uses `base_port + i`.
    pub base_port: u16,
    /// Run without a window.
    pub headless: bool,
}

/// Launches one Chrome per session.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    options: LaunchOptions,
}

impl ChromiumLauncher {
    /// Creates a launcher.
    #[must_use]
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, index: usize) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let session = ChromiumSession::launch(&self.options, index).await?;
        Ok(Box::new(session))
    }
}

#[derive(Debug)]
struct PendingRequest {
    url: String,
    headers: Value,
}

#[derive(Debug)]
struct DownloadRecord {
    status: DownloadStatus,
    suggested_name: String,
    target: Option<DownloadTarget>,
}

/// State written by the event tasks.
#[derive(Debug, Default)]
struct Observed {
    pending: HashMap<String, PendingRequest>,
    captured: Vec<CapturedResponse>,
    started: VecDeque<DownloadId>,
    downloads: HashMap<String, DownloadRecord>,
    target: Option<DownloadTarget>,
}

type SharedObserved = Arc<Mutex<Observed>>;

fn lock(observed: &SharedObserved) -> MutexGuard<'_, Observed> {
    observed.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One Chrome instance with a single page.
pub struct ChromiumSession {
    index: usize,
    browser: Browser,
    page: Page,
    observed: SharedObserved,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ChromiumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumSession")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ChromiumSession {
    /// Launches Chrome for session `index` and starts the event tasks.
    ///
    /// # Errors
    ///
    /// Returns [`BrowserError::Driver`] if Chrome cannot be started or the
    /// protocol listeners cannot be attached.
    pub async fn launch(options: &LaunchOptions, index: usize) -> Result<Self, BrowserError> {
        let port = u16::try_from(index)
            .ok()
            .and_then(|offset| options.base_port.checked_add(offset))
            .ok_or_else(|| BrowserError::driver("debug port out of range"))?;
        let profile = options.profile_root.join(format!("data{index}"));

        let mut builder = BrowserConfig::builder().user_data_dir(&profile).port(port);
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::driver)?;
        let (browser, mut handler) = Browser::launch(config).await.map_err(BrowserError::driver)?;

        let mut tasks = vec![tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "devtools handler error");
                }
            }
        })];

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(BrowserError::driver)?;
        let observed = SharedObserved::default();
        tasks.extend(spawn_network_tasks(&page, &observed).await?);
        tasks.extend(spawn_download_tasks(&browser, &observed).await?);

        info!(session = index, port, profile = %profile.display(), "browser launched");
        Ok(Self {
            index,
            browser,
            page,
            observed,
            tasks,
        })
    }

    async fn eval(&self, script: String) -> Result<Value, BrowserError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(BrowserError::script)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn find(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        let script = find_script(scope, locator);
        let mut wait = BoundedWait::new(timeout, FIND_POLL);
        loop {
            match self.eval(script.clone()).await? {
                Value::Array(ids) if !ids.is_empty() => {
                    return Ok(ids
                        .iter()
                        .map(|id| ElementRef(id.to_string()))
                        .collect());
                }
                Value::Null => {
                    if let Some(scope) = scope {
                        return Err(BrowserError::stale(scope));
                    }
                }
                _ => {}
            }
            if !wait.pause().await {
                return Ok(Vec::new());
            }
        }
    }

    /// Runs `body` with `el` bound to the registered element.
    async fn with_element(&self, element: &ElementRef, body: &str) -> Result<Value, BrowserError> {
        let script = format!(
            "(() => {{ const el = (window.__harvesterRefs || [])[{id}]; \
             if (!el || !el.isConnected) {{ return {{ stale: true }}; }} \
             return {{ value: (() => {{ {body} }})() }}; }})()",
            id = element_index(element)?,
        );
        let result = self.eval(script).await?;
        if result.get("stale").and_then(Value::as_bool) == Some(true) {
            return Err(BrowserError::stale(element));
        }
        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn open(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::navigation(url, e))?;
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), BrowserError> {
        self.page
            .reload()
            .await
            .map_err(|e| BrowserError::navigation("reload", e))?;
        Ok(())
    }

    async fn pending_requests(&mut self) -> Result<usize, BrowserError> {
        Ok(lock(&self.observed).pending.len())
    }

    async fn drain_responses(&mut self) -> Result<Vec<CapturedResponse>, BrowserError> {
        Ok(std::mem::take(&mut lock(&self.observed).captured))
    }

    async fn find_all(
        &mut self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        self.find(None, locator, timeout).await
    }

    async fn find_within(
        &mut self,
        scope: &ElementRef,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        self.find(Some(scope), locator, timeout).await
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.with_element(element, "el.click(); return true;").await?;
        Ok(())
    }

    async fn context_click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.with_element(
            element,
            "el.dispatchEvent(new MouseEvent('contextmenu', \
             { bubbles: true, cancelable: true, button: 2 })); return true;",
        )
        .await?;
        Ok(())
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError> {
        let value = self
            .with_element(element, "return el.innerText || el.textContent || '';")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn scroll_into_view(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.with_element(element, "el.scrollIntoView({ block: 'center' }); return true;")
            .await?;
        Ok(())
    }

    async fn scroll_element_to(
        &mut self,
        element: &ElementRef,
        y: i64,
    ) -> Result<(), BrowserError> {
        self.with_element(element, &format!("el.scrollTop = {y}; return true;"))
            .await?;
        Ok(())
    }

    async fn run_script(&mut self, script: &str) -> Result<Value, BrowserError> {
        self.eval(script.to_string()).await
    }

    async fn configure_download(&mut self, target: &DownloadTarget) -> Result<(), BrowserError> {
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(target.dir.display().to_string())
            .events_enabled(true)
            .build()
            .map_err(BrowserError::download)?;
        self.browser
            .execute(params)
            .await
            .map_err(BrowserError::download)?;
        lock(&self.observed).target = Some(target.clone());
        debug!(dir = %target.dir.display(), name = %target.file_name, "download target set");
        Ok(())
    }

    async fn wait_download_start(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<DownloadId>, BrowserError> {
        let mut wait = BoundedWait::new(timeout, FIND_POLL);
        loop {
            if let Some(id) = lock(&self.observed).started.pop_front() {
                return Ok(Some(id));
            }
            if !wait.pause().await {
                return Ok(None);
            }
        }
    }

    async fn download_status(&mut self, id: &DownloadId) -> Result<DownloadStatus, BrowserError> {
        lock(&self.observed)
            .downloads
            .get(&id.0)
            .map(|record| record.status.clone())
            .ok_or_else(|| BrowserError::download(format!("unknown download {}", id.0)))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let result = self.browser.close().await.map(|_| ());
        for task in &self.tasks {
            task.abort();
        }
        info!(session = self.index, "browser closed");
        result.map_err(BrowserError::driver)
    }
}

async fn spawn_network_tasks(
    page: &Page,
    observed: &SharedObserved,
) -> Result<Vec<JoinHandle<()>>, BrowserError> {
    let mut sent = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(BrowserError::driver)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(BrowserError::driver)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(BrowserError::driver)?;

    let on_sent = {
        let observed = Arc::clone(observed);
        tokio::spawn(async move {
            while let Some(event) = sent.next().await {
                if !event.request.url.contains(LISTING_LISTEN_PATTERN) {
                    continue;
                }
                let headers = serde_json::to_value(&event.request.headers).unwrap_or_default();
                lock(&observed).pending.insert(
                    event.request_id.inner().clone(),
                    PendingRequest {
                        url: event.request.url.clone(),
                        headers,
                    },
                );
            }
        })
    };

    let on_finished = {
        let observed = Arc::clone(observed);
        let page = page.clone();
        tokio::spawn(async move {
            while let Some(event) = finished.next().await {
                let key = event.request_id.inner().clone();
                let Some(request) = lock(&observed).pending.remove(&key) else {
                    continue;
                };
                let body = match page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                {
                    Ok(response) if !response.result.base64_encoded => {
                        serde_json::from_str::<Value>(&response.result.body).ok()
                    }
                    Ok(_) => None,
                    Err(e) => {
                        debug!(url = %request.url, error = %e, "response body unavailable");
                        None
                    }
                };
                let captured = capture(&page, request, body).await;
                lock(&observed).captured.push(captured);
            }
        })
    };

    let on_failed = {
        let observed = Arc::clone(observed);
        let page = page.clone();
        tokio::spawn(async move {
            while let Some(event) = failed.next().await {
                let key = event.request_id.inner().clone();
                let Some(request) = lock(&observed).pending.remove(&key) else {
                    continue;
                };
                let captured = capture(&page, request, None).await;
                lock(&observed).captured.push(captured);
            }
        })
    };

    Ok(vec![on_sent, on_finished, on_failed])
}

async fn capture(page: &Page, request: PendingRequest, body: Option<Value>) -> CapturedResponse {
    let cookies = match page.get_cookies().await {
        Ok(cookies) => serde_json::to_value(cookies).unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "cookies unavailable");
            Value::Null
        }
    };
    CapturedResponse {
        url: request.url,
        body,
        request: RequestContext::new(request.headers, cookies),
    }
}

async fn spawn_download_tasks(
    browser: &Browser,
    observed: &SharedObserved,
) -> Result<Vec<JoinHandle<()>>, BrowserError> {
    let mut begins = browser
        .event_listener::<EventDownloadWillBegin>()
        .await
        .map_err(BrowserError::driver)?;
    let mut progress = browser
        .event_listener::<EventDownloadProgress>()
        .await
        .map_err(BrowserError::driver)?;

    let on_begin = {
        let observed = Arc::clone(observed);
        tokio::spawn(async move {
            while let Some(event) = begins.next().await {
                let mut state = lock(&observed);
                let target = state.target.clone();
                state.downloads.insert(
                    event.guid.clone(),
                    DownloadRecord {
                        status: DownloadStatus {
                            state: DownloadState::InProgress,
                            final_path: None,
                            url: event.url.clone(),
                        },
                        suggested_name: event.suggested_filename.clone(),
                        target,
                    },
                );
                state.started.push_back(DownloadId(event.guid.clone()));
                debug!(guid = %event.guid, url = %event.url, "download started");
            }
        })
    };

    let on_progress = {
        let observed = Arc::clone(observed);
        tokio::spawn(async move {
            while let Some(event) = progress.next().await {
                let state = match event.state {
                    DownloadProgressState::InProgress => continue,
                    DownloadProgressState::Canceled => DownloadState::Canceled,
                    DownloadProgressState::Completed => DownloadState::Completed,
                };
                let placement = lock(&observed)
                    .downloads
                    .get(&event.guid)
                    .map(|record| (record.target.clone(), record.suggested_name.clone()));
                let Some((target, suggested)) = placement else {
                    continue;
                };

                let (state, final_path) = match (state, target) {
                    (DownloadState::Completed, Some(target)) => {
                        place_download(&event.guid, &suggested, &target).await
                    }
                    (other, _) => (other, None),
                };
                if let Some(record) = lock(&observed).downloads.get_mut(&event.guid) {
                    record.status.state = state;
                    record.status.final_path = final_path;
                }
            }
        })
    };

    Ok(vec![on_begin, on_progress])
}

/// Renames a finished `guid` file to the configured name.
async fn place_download(
    guid: &str,
    suggested: &str,
    target: &DownloadTarget,
) -> (DownloadState, Option<PathBuf>) {
    let downloaded = target.dir.join(guid);
    let name = match Path::new(suggested).extension() {
        Some(ext) => format!("{}.{}", target.file_name, ext.to_string_lossy()),
        None => target.file_name.clone(),
    };
    let final_path = target.dir.join(name);

    if target.if_exists == IfExists::Skip && tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
        let _ = tokio::fs::remove_file(&downloaded).await;
        debug!(path = %final_path.display(), "download target exists; skipped");
        return (DownloadState::Skipped, None);
    }
    match tokio::fs::rename(&downloaded, &final_path).await {
        Ok(()) => (DownloadState::Completed, Some(final_path)),
        Err(e) => {
            warn!(from = %downloaded.display(), error = %e, "could not rename download");
            (DownloadState::Interrupted, None)
        }
    }
}

fn element_index(element: &ElementRef) -> Result<usize, BrowserError> {
    element
        .0
        .parse()
        .map_err(|_| BrowserError::stale(element))
}

/// Script returning registry indices of the matches, or `null` for a stale
/// scope.
fn find_script(scope: Option<&ElementRef>, locator: &Locator) -> String {
    let scope = scope.map_or_else(|| "null".to_string(), |s| s.0.clone());
    let (css, xpath) = match locator.as_css() {
        Some(css) => (Value::String(css), Value::Null),
        None => (Value::Null, Value::String(xpath_for(locator))),
    };
    format!(
        r"(() => {{
  const refs = window.__harvesterRefs || (window.__harvesterRefs = []);
  const scopeId = {scope};
  let root = document;
  if (scopeId !== null) {{
    const el = refs[scopeId];
    if (!el || !el.isConnected) {{ return null; }}
    root = el.contentDocument || el;
  }}
  const css = {css};
  let found = [];
  if (css !== null) {{
    found = Array.from(root.querySelectorAll(css));
  }} else {{
    const doc = root.ownerDocument || root;
    const snap = doc.evaluate({xpath}, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    for (let i = 0; i < snap.snapshotLength; i++) {{ found.push(snap.snapshotItem(i)); }}
  }}
  return found.map((el) => {{ refs.push(el); return refs.length - 1; }});
}})()"
    )
}

/// XPath for the text-based locators.
fn xpath_for(locator: &Locator) -> String {
    match locator {
        Locator::Text(text) => format!(".//*[text()[contains(., {})]]", xpath_literal(text)),
        Locator::TagText { tag, text } => {
            format!(".//{tag}[contains(., {})]", xpath_literal(text))
        }
        _ => ".//*[false()]".to_string(),
    }
}

fn xpath_literal(text: &str) -> String {
    if text.contains('"') {
        format!("'{text}'")
    } else {
        format!("\"{text}\"")
    }
}
