//! One browser session crawling the workspace.
//!
//! A [`SessionDriver`] owns its [`BrowserSession`] exclusively. After the
//! operator confirms login it loops: wait for in-flight listing requests to
//! settle, harvest captured listings, then take one node from the shared
//! work queue and process it. Folders are expanded (which triggers new
//! listings); files are exported.
//!
//! A session ends after a run of idle rounds with nothing to do, or when the
//! stop gate opens.

mod context;
mod error;
mod export;
mod scroll;
mod selectors;
mod strategy;
mod wait;

use tracing::{debug, error, info, instrument, warn};

pub use context::CrawlContext;
pub use error::SessionError;
pub use export::{ExportOutcome, ExportPlan, RETRY_BUDGET_EXHAUSTED, UNKNOWN_FORMAT};
pub use selectors::{NO_PERMISSION_TEXT, TREE_CONTAINER_CLASS};
pub use strategy::{FileCategory, StrategyResult};
pub use wait::BoundedWait;

use crate::browser::BrowserSession;
use crate::download::RequestContext;
use crate::gate::Gate;
use crate::replay::ReplayRequest;
use crate::tree::Node;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Entry page opened; waiting for the operator.
    AwaitingLogin,
    /// Logged in and on the library root.
    Initialized,
    /// Nothing queued; pausing between rounds.
    Idle,
    /// Waiting for listings and harvesting them.
    Draining,
    /// Opening a node or expanding a folder.
    Navigating,
    /// Exporting a file.
    Exporting,
    /// Finished and closed.
    Terminated,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session index.
    pub index: usize,
    /// Nodes taken from the work queue.
    pub nodes_processed: usize,
    /// Nodes whose every attempt failed.
    pub nodes_abandoned: usize,
}

/// Drives one browser session.
pub struct SessionDriver {
    index: usize,
    browser: Box<dyn BrowserSession>,
    ctx: CrawlContext,
    login: Gate,
    stop: Gate,
    state: SessionState,
    last_request: RequestContext,
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("index", &self.index)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SessionDriver {
    /// Creates a driver for session `index`.
    #[must_use]
    pub fn new(
        index: usize,
        browser: Box<dyn BrowserSession>,
        ctx: CrawlContext,
        login: Gate,
        stop: Gate,
    ) -> Self {
        Self {
            index,
            browser,
            ctx,
            login,
            stop,
            state: SessionState::AwaitingLogin,
            last_request: RequestContext::default(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Headers and cookies of the most recent captured listing request.
    #[must_use]
    pub fn last_request(&self) -> &RequestContext {
        &self.last_request
    }

    /// Runs the session to completion and closes the browser.
    #[instrument(skip(self), fields(session = self.index))]
    pub async fn run(mut self) -> SessionSummary {
        let mut summary = SessionSummary {
            index: self.index,
            ..SessionSummary::default()
        };

        let entry = self.ctx.workspace.entry_url();
        if let Err(e) = self.browser.open(&entry).await {
            warn!(url = %entry, error = %e, "could not open entry page");
        }
        info!("waiting for login confirmation");
        let stopped = tokio::select! {
            () = self.login.wait() => false,
            () = self.stop.wait() => true,
        };
        if stopped {
            info!("stopped before login");
            self.shutdown().await;
            return summary;
        }

        let library = self.ctx.workspace.library_url();
        if let Err(e) = self.browser.open(&library).await {
            warn!(url = %library, error = %e, "could not open library page");
        }
        self.state = SessionState::Initialized;
        info!("crawling");

        let mut idle_rounds = 0;
        loop {
            self.state = SessionState::Draining;
            self.settle().await;
            self.harvest_listings().await;

            if let Some(node) = self.ctx.work_queue().try_pop() {
                idle_rounds = 0;
                summary.nodes_processed += 1;
                if !self.process_with_retries(&node).await {
                    summary.nodes_abandoned += 1;
                }
                continue;
            }

            if self.stop.is_open() {
                info!("stop requested");
                break;
            }
            idle_rounds += 1;
            if idle_rounds >= self.ctx.budgets.idle_rounds {
                info!(idle_rounds, "no work left; ending session");
                break;
            }
            debug!(idle_rounds, "work queue empty");
            self.state = SessionState::Idle;
            tokio::time::sleep(self.ctx.timings.idle_pause).await;
        }

        self.shutdown().await;
        info!(
            processed = summary.nodes_processed,
            abandoned = summary.nodes_abandoned,
            "session finished"
        );
        summary
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "closing browser failed");
        }
        self.state = SessionState::Terminated;
    }

    /// Waits until no tracked listing request is in flight, or times out.
    pub async fn settle(&mut self) {
        let timings = self.ctx.timings;
        tokio::time::sleep(timings.settle_poll).await;
        let mut wait = BoundedWait::new(timings.settle_timeout, timings.settle_poll);
        loop {
            match self.browser.pending_requests().await {
                Ok(0) => return,
                Ok(pending) => debug!(pending, "listing requests in flight"),
                Err(e) => {
                    debug!(error = %e, "cannot read pending requests");
                    return;
                }
            }
            if !wait.pause().await {
                debug!("settle timed out");
                return;
            }
        }
    }

    /// Feeds captured listings to discovery; bodiless ones go to replay.
    pub async fn harvest_listings(&mut self) {
        let responses = match self.browser.drain_responses().await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(error = %e, "cannot drain captured responses");
                return;
            }
        };
        for response in responses {
            if let Some(data) = response.data() {
                self.ctx.discovery.ingest(data);
                if !response.request.is_empty() {
                    self.last_request = response.request;
                }
            } else if !response.url.is_empty() {
                debug!(url = %response.url, "listing without body; queueing replay");
                self.ctx.replay_queue.push(ReplayRequest {
                    url: response.url,
                    request: response.request,
                });
            }
        }
    }

    /// Processes `node` up to the node budget; `false` if every attempt failed.
    async fn process_with_retries(&mut self, node: &Node) -> bool {
        let attempts = self.ctx.budgets.node_attempts.max(1);
        for attempt in 1..=attempts {
            match self.process_node(node).await {
                Ok(()) => return true,
                Err(e) => error!(node = %node.dentry_uuid, attempt, error = %e, "node attempt failed"),
            }
        }
        error!(node = %node.dentry_uuid, name = %node.name, "abandoning node");
        false
    }

    /// Opens `node`'s page, then exports it (file) or expands it (folder).
    ///
    /// A file export that errors re-queues the node.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when navigation fails or a folder row cannot
    /// be expanded.
    #[instrument(skip(self, node), fields(session = self.index, node = %node.dentry_uuid))]
    pub async fn process_node(&mut self, node: &Node) -> Result<(), SessionError> {
        self.state = SessionState::Navigating;
        let url = self.ctx.workspace.node_url(&node.dentry_uuid);
        self.browser.open(&url).await?;
        self.settle().await;

        if node.is_file() {
            self.state = SessionState::Exporting;
            if let Err(e) = self.export_file(node).await {
                warn!(error = %e, "export failed; re-queueing node");
                self.ctx.work_queue().push(node.clone());
            }
            return Ok(());
        }

        self.expand_folder(node).await
    }

    async fn expand_folder(&mut self, node: &Node) -> Result<(), SessionError> {
        let row_locator = selectors::tree_row(&node.dentry_uuid);
        let pause = self.ctx.timings.ui_pause;
        for attempt in 1..=self.ctx.budgets.folder_locate_attempts.max(1) {
            let Some(row) = self.scroll_to_locate(&row_locator).await else {
                debug!(attempt, "folder row not rendered");
                self.settle().await;
                continue;
            };
            tokio::time::sleep(pause).await;
            let clicked = match self.browser.scroll_into_view(&row).await {
                Ok(()) => self.browser.click(&row).await,
                Err(e) => Err(e),
            };
            match clicked {
                Ok(()) => {
                    tokio::time::sleep(pause).await;
                    debug!(name = %node.name, "folder expanded");
                    return Ok(());
                }
                Err(e) => warn!(attempt, error = %e, "could not click folder row"),
            }
        }
        Err(SessionError::row_not_found(&node.dentry_uuid))
    }
}
