//! Scripted in-memory browser for driving sessions without Chrome.
//!
//! A [`ScriptedBrowser`] answers element lookups from a set of "present"
//! locators, replays canned listing responses when a URL is opened and
//! hands out scripted download outcomes. Every call is logged so tests can
//! assert on exactly what a session did.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::browser::{
    BrowserError, BrowserLauncher, BrowserSession, CapturedResponse, DownloadId, DownloadState,
    DownloadStatus, DownloadTarget, ElementRef, Locator,
};
use harvester_core::download::RequestContext;
use serde_json::{Value, json};

/// What the fake page looks like and everything the session did to it.
#[derive(Debug, Default)]
pub struct BrowserState {
    /// Call log, one entry per capability call (`"open <url>"`, `"click <el>"`, ...).
    pub calls: Vec<String>,
    /// Locators (in display form) that resolve to an element.
    pub present: HashSet<String>,
    /// Text of elements, keyed by element id.
    pub texts: HashMap<String, String>,
    /// Responses captured when a URL is opened.
    pub responses_on_open: HashMap<String, Vec<CapturedResponse>>,
    /// Captured responses not yet drained.
    pub captured: Vec<CapturedResponse>,
    /// Outcomes handed out by successive `wait_download_start` calls.
    pub download_plan: VecDeque<DownloadStatus>,
    /// Statuses of started downloads.
    pub downloads: HashMap<String, DownloadStatus>,
    /// Every download target configured.
    pub targets: Vec<DownloadTarget>,
    /// Number of `drain_responses` calls.
    pub drains: usize,
    /// Lookups per locator, in display form.
    pub lookups: HashMap<String, usize>,
    /// Tree scroll geometry reported to metric scripts.
    pub tree: TreeScroll,
}

/// Scroll state of the virtualized tree.
///
/// Rows listed in `rows_at` render only once the offset reaches their value.
/// With `stall_at` set, the offset cannot pass that value until the tree is
/// scrolled back to the top from the stalled position.
#[derive(Debug, Clone, Default)]
pub struct TreeScroll {
    pub top: i64,
    pub height: i64,
    pub rows_at: HashMap<String, i64>,
    pub stall_at: Option<i64>,
}

impl TreeScroll {
    fn scroll_to(&mut self, y: i64) {
        if y == 0 && self.stall_at == Some(self.top) {
            self.stall_at = None;
        }
        let y = y.max(0);
        self.top = self.stall_at.map_or(y, |limit| y.min(limit));
    }

    fn renders(&self, key: &str) -> bool {
        self.rows_at.get(key).is_some_and(|at| self.top >= *at)
    }
}

impl BrowserState {
    /// Number of logged calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Index of the `n`th (0-based) call starting with `prefix`.
    pub fn position(&self, prefix: &str, n: usize) -> Option<usize> {
        self.calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.starts_with(prefix))
            .nth(n)
            .map(|(i, _)| i)
    }

    /// Number of lookups of `locator`.
    pub fn lookups_of(&self, locator: &Locator) -> usize {
        self.lookups.get(&locator.to_string()).copied().unwrap_or(0)
    }

    /// Makes `locator` resolvable.
    pub fn show(&mut self, locator: &Locator) {
        self.present.insert(locator.to_string());
    }

    /// Makes `locator` resolvable with the given text.
    pub fn show_text(&mut self, locator: &Locator, text: &str) {
        self.show(locator);
        self.texts.insert(locator.to_string(), text.to_string());
    }
}

/// Shared handle to a browser's state.
pub type SharedState = Arc<Mutex<BrowserState>>;

/// A [`BrowserSession`] over a [`BrowserState`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedBrowser {
    state: SharedState,
}

impl ScriptedBrowser {
    pub fn new() -> (Self, SharedState) {
        let browser = Self::default();
        let state = Arc::clone(&browser.state);
        (browser, state)
    }

    fn with<R>(&self, f: impl FnOnce(&mut BrowserState) -> R) -> R {
        let mut state = self.state.lock().expect("browser state poisoned");
        f(&mut state)
    }

    fn log(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn open(&mut self, url: &str) -> Result<(), BrowserError> {
        self.with(|s| {
            s.calls.push(format!("open {url}"));
            if let Some(responses) = s.responses_on_open.remove(url) {
                s.captured.extend(responses);
            }
        });
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), BrowserError> {
        self.log("reload".to_string());
        Ok(())
    }

    async fn pending_requests(&mut self) -> Result<usize, BrowserError> {
        Ok(0)
    }

    async fn drain_responses(&mut self) -> Result<Vec<CapturedResponse>, BrowserError> {
        Ok(self.with(|s| {
            s.drains += 1;
            std::mem::take(&mut s.captured)
        }))
    }

    async fn find_all(
        &mut self,
        locator: &Locator,
        _timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        let key = locator.to_string();
        Ok(self.with(|s| {
            *s.lookups.entry(key.clone()).or_default() += 1;
            if s.present.contains(&key) || s.tree.renders(&key) {
                vec![ElementRef(key)]
            } else {
                Vec::new()
            }
        }))
    }

    async fn find_within(
        &mut self,
        _scope: &ElementRef,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Vec<ElementRef>, BrowserError> {
        self.find_all(locator, timeout).await
    }

    async fn click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.log(format!("click {element}"));
        Ok(())
    }

    async fn context_click(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.log(format!("context_click {element}"));
        Ok(())
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, BrowserError> {
        Ok(self.with(|s| s.texts.get(&element.0).cloned().unwrap_or_default()))
    }

    async fn scroll_into_view(&mut self, element: &ElementRef) -> Result<(), BrowserError> {
        self.log(format!("scroll_into_view {element}"));
        Ok(())
    }

    async fn scroll_element_to(
        &mut self,
        element: &ElementRef,
        y: i64,
    ) -> Result<(), BrowserError> {
        self.with(|s| {
            s.calls.push(format!("scroll_to {element} {y}"));
            s.tree.scroll_to(y);
        });
        Ok(())
    }

    async fn run_script(&mut self, _script: &str) -> Result<Value, BrowserError> {
        Ok(self.with(|s| {
            json!({"scrollTop": s.tree.top, "clientHeight": 600, "scrollHeight": s.tree.height})
        }))
    }

    async fn configure_download(&mut self, target: &DownloadTarget) -> Result<(), BrowserError> {
        self.with(|s| {
            s.calls.push(format!("configure {}", target.dir.display()));
            s.targets.push(target.clone());
        });
        Ok(())
    }

    async fn wait_download_start(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<DownloadId>, BrowserError> {
        Ok(self.with(|s| {
            let status = s.download_plan.pop_front()?;
            let id = format!("dl-{}", s.downloads.len());
            s.calls.push(format!("download_started {id}"));
            s.downloads.insert(id.clone(), status);
            Some(DownloadId(id))
        }))
    }

    async fn download_status(&mut self, id: &DownloadId) -> Result<DownloadStatus, BrowserError> {
        self.with(|s| s.downloads.get(&id.0).cloned())
            .ok_or_else(|| BrowserError::download("unknown download"))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.log("close".to_string());
        Ok(())
    }
}

/// Launcher handing out pre-built scripted browsers by index.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    browsers: Mutex<HashMap<usize, ScriptedBrowser>>,
}

impl ScriptedLauncher {
    pub fn new(browsers: Vec<ScriptedBrowser>) -> Self {
        Self {
            browsers: Mutex::new(browsers.into_iter().enumerate().collect()),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, index: usize) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let browser = self
            .browsers
            .lock()
            .expect("launcher poisoned")
            .remove(&index)
            .ok_or_else(|| BrowserError::driver(format!("no scripted browser {index}")))?;
        Ok(Box::new(browser))
    }
}

/// Tree row of a node.
pub fn row(dentry_uuid: &str) -> Locator {
    Locator::attr("data-rbd-draggable-id", dentry_uuid)
}

/// Scrollable tree container.
pub fn tree_container() -> Locator {
    Locator::css(".MAINSITE_CATALOG-node-tree-list")
}

/// Download button of stored files.
pub fn download_button() -> Locator {
    Locator::item_key("download")
}

/// No-permission banner.
pub fn permission_banner() -> Locator {
    Locator::item_key("apply-title-view")
}

/// A finished download that landed at `path`.
pub fn completed(path: &str) -> DownloadStatus {
    DownloadStatus {
        state: DownloadState::Completed,
        final_path: Some(path.into()),
        url: "blob:https://alidocs.dingtalk.com/1".to_string(),
    }
}

/// A download the browser gave up on.
pub fn interrupted(url: &str) -> DownloadStatus {
    DownloadStatus {
        state: DownloadState::Interrupted,
        final_path: None,
        url: url.to_string(),
    }
}

/// A listing response with a usable body.
pub fn listing(parent: &str, children: Value, request: RequestContext) -> CapturedResponse {
    CapturedResponse {
        url: "https://alidocs.dingtalk.com/box/api/v2/dentry/list?dentryUuid=root".to_string(),
        body: Some(json!({"data": {"name": parent, "children": children}})),
        request,
    }
}
