//! Harvester Core Library
//!
//! This library crawls a cloud document workspace through real browser
//! sessions and exports every file it finds, mirroring the remote folder
//! tree on disk.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`tree`] - Tree nodes and admission of newly listed children
//! - [`queue`] - Shared work queues and claim sets
//! - [`browser`] - The browser capability surface sessions are driven through
//! - [`session`] - One browser session: settle, harvest, navigate, export
//! - [`replay`] - Out-of-band re-fetch of listings captured without a body
//! - [`download`] - HTTP client, retry policy and the fallback downloader
//! - [`ledger`] - Terminal outcomes and their durable logs
//! - [`report`] - End-of-run report
//! - [`orchestrator`] - Starts the pools and sessions and gates the run
//! - [`config`] - Settings, timings and retry budgets

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod browser;
pub mod config;
pub mod download;
pub mod gate;
pub mod ledger;
pub mod orchestrator;
pub mod queue;
pub mod replay;
pub mod report;
pub mod session;
pub mod tree;

// Re-export commonly used types
pub use browser::{BrowserError, BrowserLauncher, BrowserSession, Locator};
pub use config::{CrawlTimings, RetryBudgets, Settings, WorkspaceConfig};
pub use download::{
    DownloadError, DownloadTask, FallbackDownloader, HttpClient, RequestContext, RetryDecision,
    RetryPolicy, clean_filename,
};
pub use gate::Gate;
pub use ledger::OutcomeLedger;
pub use orchestrator::{Orchestrator, OrchestratorError, RunHandle};
pub use queue::{ClaimSet, WorkQueue};
pub use replay::{ReplayRequest, ReplayWorker};
pub use report::RunReport;
pub use session::{CrawlContext, ExportOutcome, SessionDriver, SessionError};
pub use tree::{DiscoveryProcessor, Node};
