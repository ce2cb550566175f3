//! Wires sessions and worker pools together for one run.
//!
//! [`Orchestrator::begin`] opens the outcome ledger, starts the replay and
//! fallback pools and launches the browser sessions. The returned
//! [`RunHandle`] is what a front end drives: confirm the login, then
//! [`drain_and_stop`](RunHandle::drain_and_stop) once the operator says the
//! downloads are done.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::browser::{BrowserError, BrowserLauncher};
use crate::config::{ConfigError, CrawlTimings, RetryBudgets, Settings};
use crate::download::{FallbackDownloader, HttpClient};
use crate::gate::Gate;
use crate::ledger::{LedgerError, OutcomeLedger};
use crate::replay::ReplayWorker;
use crate::report::RunReport;
use crate::session::{CrawlContext, SessionDriver, SessionSummary};

/// Poll interval while waiting for the work queue to drain.
const DRAIN_POLL: Duration = Duration::from_millis(500);

/// Errors from starting or finishing a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A worker count is out of range.
    #[error(transparent)]
    InvalidWorkers(#[from] ConfigError),

    /// No browser session could be launched.
    #[error("no browser session could be launched: {source}")]
    Launch {
        /// Error of the last launch attempt.
        #[source]
        source: BrowserError,
    },

    /// The outcome logs could not be created.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The report could not be written.
    #[error("failed to write report to {path}: {source}")]
    Report {
        /// Output directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Builder for a run.
pub struct Orchestrator {
    settings: Settings,
    launcher: Arc<dyn BrowserLauncher>,
    client: HttpClient,
    timings: CrawlTimings,
    budgets: RetryBudgets,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with default timings and budgets.
    #[must_use]
    pub fn new(settings: Settings, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            settings,
            launcher,
            client: HttpClient::new(),
            timings: CrawlTimings::default(),
            budgets: RetryBudgets::default(),
        }
    }

    /// Replaces the timings.
    #[must_use]
    pub fn with_timings(mut self, timings: CrawlTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Replaces the retry budgets.
    #[must_use]
    pub fn with_budgets(mut self, budgets: RetryBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Replaces the HTTP client used by the replay and fallback pools.
    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// Starts the pools and launches the sessions.
    ///
    /// Sessions that fail to launch are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the worker counts are invalid, the
    /// ledger cannot be opened, or no session could be launched.
    #[instrument(skip(self), fields(output = %self.settings.output_dir.display()))]
    pub async fn begin(self) -> Result<RunHandle, OrchestratorError> {
        let workers = self.settings.workers;
        workers.validate()?;

        let ledger = Arc::new(OutcomeLedger::open(&self.settings.output_dir)?);
        let ctx = CrawlContext::new(
            self.settings.workspace.clone(),
            self.settings.library_root(),
            ledger,
        )
        .with_timings(self.timings)
        .with_budgets(self.budgets);

        let mut pool = Vec::with_capacity(workers.download_workers + workers.replay_workers);
        for _ in 0..workers.download_workers {
            let downloader = FallbackDownloader::new(
                self.client.clone(),
                self.budgets.fallback,
                Arc::clone(&ctx.ledger),
                Arc::clone(&ctx.file_claims),
                Arc::clone(ctx.work_queue()),
            );
            pool.push(tokio::spawn(downloader.run(Arc::clone(&ctx.download_queue))));
        }
        for _ in 0..workers.replay_workers {
            let replayer =
                ReplayWorker::new(self.client.clone(), self.budgets.replay, ctx.discovery.clone());
            pool.push(tokio::spawn(replayer.run(Arc::clone(&ctx.replay_queue))));
        }
        info!(
            download_workers = workers.download_workers,
            replay_workers = workers.replay_workers,
            "worker pools started"
        );

        let login = Gate::new();
        let stop = Gate::new();
        let mut sessions = Vec::with_capacity(workers.sessions);
        let mut last_error = None;
        for index in 0..workers.sessions {
            match self.launcher.launch(index).await {
                Ok(browser) => {
                    let driver =
                        SessionDriver::new(index, browser, ctx.clone(), login.clone(), stop.clone());
                    sessions.push(tokio::spawn(driver.run()));
                }
                Err(e) => {
                    warn!(session = index, error = %e, "session failed to launch");
                    last_error = Some(e);
                }
            }
        }

        if sessions.is_empty() {
            for worker in &pool {
                worker.abort();
            }
            let source = last_error.unwrap_or(BrowserError::Closed);
            return Err(OrchestratorError::Launch { source });
        }
        info!(sessions = sessions.len(), "sessions launched; waiting for login");

        Ok(RunHandle {
            ctx,
            output_dir: self.settings.output_dir,
            login,
            stop,
            sessions,
            pool,
        })
    }
}

/// A running crawl.
#[derive(Debug)]
pub struct RunHandle {
    ctx: CrawlContext,
    output_dir: PathBuf,
    login: Gate,
    stop: Gate,
    sessions: Vec<JoinHandle<SessionSummary>>,
    pool: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Shared run state.
    #[must_use]
    pub fn context(&self) -> &CrawlContext {
        &self.ctx
    }

    /// Number of sessions that launched.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Lets every session leave the login checkpoint.
    pub fn confirm_login(&self) {
        info!("login confirmed");
        self.login.open();
    }

    /// Waits for the work queue to drain, stops the sessions and writes the
    /// report to the output directory.
    ///
    /// The wait also ends once every session has finished, since nothing is
    /// left to drain the queue; [`finish`](Self::finish) reports what remains.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Report`] if the report cannot be written.
    #[instrument(skip(self))]
    pub async fn drain_and_stop(self) -> Result<RunReport, OrchestratorError> {
        while !self.ctx.work_queue().is_empty() {
            if self.sessions.iter().all(JoinHandle::is_finished) {
                warn!(
                    queued = self.ctx.work_queue().len(),
                    "every session has ended with work still queued"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        self.stop.open();
        self.finish().await
    }

    /// Waits for every session to end on its own and for queued fallback
    /// downloads to be picked up, then writes the report.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Report`] if the report cannot be written.
    pub async fn finish(self) -> Result<RunReport, OrchestratorError> {
        for handle in self.sessions {
            match handle.await {
                Ok(summary) => info!(
                    session = summary.index,
                    processed = summary.nodes_processed,
                    abandoned = summary.nodes_abandoned,
                    "session joined"
                ),
                Err(e) => error!(error = %e, "session task failed"),
            }
        }
        while !self.ctx.download_queue.is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        for worker in &self.pool {
            worker.abort();
        }
        let requeued = self.ctx.work_queue().len();
        if requeued > 0 {
            warn!(requeued, "nodes re-queued after the sessions ended were not processed");
        }

        let report = RunReport::collect(
            &self.ctx.file_claims,
            self.ctx.seen_nodes(),
            &self.ctx.ledger,
        );
        report
            .write_to(&self.output_dir)
            .map_err(|source| OrchestratorError::Report {
                path: self.output_dir.clone(),
                source,
            })?;
        Ok(report)
    }
}
