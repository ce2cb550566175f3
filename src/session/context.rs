//! State shared by every session of a run.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{CrawlTimings, RetryBudgets, WorkspaceConfig};
use crate::download::DownloadTask;
use crate::ledger::OutcomeLedger;
use crate::queue::{ClaimSet, WorkQueue};
use crate::replay::ReplayRequest;
use crate::tree::{DiscoveryProcessor, Node};

/// Handles to the run-wide queues, claim sets and ledger.
///
/// Cloning is cheap; all clones refer to the same state.
#[derive(Debug, Clone)]
pub struct CrawlContext {
    /// Workspace addressing.
    pub workspace: Arc<WorkspaceConfig>,
    /// Root directory exports are mirrored under.
    pub library_root: PathBuf,
    /// Pauses and timeouts.
    pub timings: CrawlTimings,
    /// Retry budgets.
    pub budgets: RetryBudgets,
    /// Node admission and the node work queue.
    pub discovery: DiscoveryProcessor,
    /// File identifiers currently claimed or already exported.
    pub file_claims: Arc<ClaimSet>,
    /// Outcome records.
    pub ledger: Arc<OutcomeLedger>,
    /// Listing requests captured without a usable body.
    pub replay_queue: Arc<WorkQueue<ReplayRequest>>,
    /// Downloads handed to the HTTP fallback.
    pub download_queue: Arc<WorkQueue<DownloadTask>>,
}

impl CrawlContext {
    /// Creates fresh shared state with default timings and budgets.
    #[must_use]
    pub fn new(
        workspace: WorkspaceConfig,
        library_root: impl Into<PathBuf>,
        ledger: Arc<OutcomeLedger>,
    ) -> Self {
        Self {
            workspace: Arc::new(workspace),
            library_root: library_root.into(),
            timings: CrawlTimings::default(),
            budgets: RetryBudgets::default(),
            discovery: DiscoveryProcessor::new(
                Arc::new(ClaimSet::new()),
                Arc::new(WorkQueue::new()),
            ),
            file_claims: Arc::new(ClaimSet::new()),
            ledger,
            replay_queue: Arc::new(WorkQueue::new()),
            download_queue: Arc::new(WorkQueue::new()),
        }
    }

    /// Replaces the timings.
    #[must_use]
    pub fn with_timings(mut self, timings: CrawlTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Replaces the budgets.
    #[must_use]
    pub fn with_budgets(mut self, budgets: RetryBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// The node work queue.
    #[must_use]
    pub fn work_queue(&self) -> &Arc<WorkQueue<Node>> {
        self.discovery.queue()
    }

    /// Node identifiers admitted so far.
    #[must_use]
    pub fn seen_nodes(&self) -> &Arc<ClaimSet> {
        self.discovery.seen()
    }
}
