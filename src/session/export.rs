//! Exporting one file node through the browser.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, instrument, warn};

use super::SessionDriver;
use super::error::SessionError;
use super::selectors::{NO_PERMISSION_TEXT, permission_banner, tree_row};
use super::strategy::{FileCategory, StrategyResult};
use super::wait::BoundedWait;
use crate::browser::{DownloadId, DownloadState, DownloadTarget, IfExists};
use crate::download::{DownloadTask, sanitized_path};
use crate::ledger::{FailedEntry, NoPermissionEntry, SkippedEntry};
use crate::tree::Node;

/// Reason recorded when every export attempt failed.
pub const RETRY_BUDGET_EXHAUSTED: &str = "retry budget exhausted";

/// Reason recorded when no strategy applies to a format.
pub const UNKNOWN_FORMAT: &str = "unknown format";

/// Where and under which name a file is exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPlan {
    /// Destination directory, mirroring the ancestor path.
    pub dest_dir: PathBuf,
    /// Sanitized name without extension.
    pub base_name: String,
    /// Extension as written in the name; used in ledger entries.
    pub file_type: String,
    /// Extension used to pick the strategy.
    pub extension: String,
    /// Sanitized ancestor path for ledger entries.
    pub display_path: String,
}

impl ExportPlan {
    /// Plans the export of `node` under `library_root`.
    #[must_use]
    pub fn for_node(node: &Node, library_root: &Path) -> Self {
        let base_name = node.base_name();
        Self {
            dest_dir: sanitized_path(library_root, node.ancestor_names()).join(&base_name),
            base_name,
            file_type: node.name_extension(),
            extension: node.resolved_extension(),
            display_path: node.display_path(),
        }
    }
}

/// Terminal result of exporting a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Another session holds the file, or it was handled earlier in this run.
    AlreadyClaimed,
    /// The destination already had content from an earlier run.
    AlreadyExported,
    /// The browser finished the download.
    Completed(Option<PathBuf>),
    /// The visible text was saved to this path.
    SavedInline(PathBuf),
    /// The download was queued for the HTTP fallback.
    HandedToFallback,
    /// The user may not open the file.
    NoPermission,
    /// Unknown format.
    Skipped,
    /// Every attempt failed.
    GaveUp,
}

/// What one attempt concluded.
enum Attempt {
    Done(ExportOutcome),
    Retry(&'static str),
}

impl SessionDriver {
    /// Exports `node`, retrying within the file budget.
    ///
    /// The file claim is held for the whole flow. It is kept on every
    /// terminal outcome so the file is not exported twice in one run.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] when the destination cannot be prepared;
    /// the claim is released first so the node can be re-queued.
    #[instrument(skip(self, node), fields(session = self.index, node = %node.dentry_uuid, name = %node.name))]
    pub async fn export_file(&mut self, node: &Node) -> Result<ExportOutcome, SessionError> {
        if !self.ctx.file_claims.claim(&node.dentry_uuid) {
            debug!("file already claimed");
            return Ok(ExportOutcome::AlreadyClaimed);
        }

        let plan = ExportPlan::for_node(node, &self.ctx.library_root);
        if has_content(&plan.dest_dir).await {
            info!(dir = %plan.dest_dir.display(), "already exported; skipping");
            return Ok(ExportOutcome::AlreadyExported);
        }
        if let Some(parent) = plan.dest_dir.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            self.ctx.file_claims.release(&node.dentry_uuid);
            return Err(SessionError::io(parent, e));
        }
        self.settle().await;

        let budgets = self.ctx.budgets;
        for attempt in 0..=budgets.file_retries {
            if attempt == budgets.reload_after + 1 {
                info!(attempt, "reloading page before retrying");
                if let Err(e) = self.browser.reload().await {
                    warn!(error = %e, "reload failed");
                }
                self.settle().await;
            }

            match self.export_attempt(node, &plan).await {
                Ok(Attempt::Done(outcome)) => {
                    info!(attempt, ?outcome, "export finished");
                    return Ok(outcome);
                }
                Ok(Attempt::Retry(reason)) => warn!(attempt, reason, "export attempt failed"),
                Err(e) => warn!(attempt, error = %e, "export attempt failed"),
            }
        }

        error!(attempts = budgets.file_retries + 1, "giving up on file");
        self.ctx.ledger.record_failed(FailedEntry {
            name: plan.base_name.clone(),
            reason: RETRY_BUDGET_EXHAUSTED.to_string(),
            url_or_type: plan.file_type.clone(),
        });
        Ok(ExportOutcome::GaveUp)
    }

    async fn export_attempt(&mut self, node: &Node, plan: &ExportPlan) -> Result<Attempt, SessionError> {
        let row_locator = tree_row(&node.dentry_uuid);
        let row = self
            .scroll_to_locate(&row_locator)
            .await
            .ok_or_else(|| SessionError::row_not_found(&node.dentry_uuid))?;
        self.browser.scroll_into_view(&row).await?;
        self.browser.click(&row).await?;

        if self.shows_no_permission().await? {
            info!("no permission to open file");
            self.ctx.ledger.record_no_permission(NoPermissionEntry {
                path: plan.display_path.clone(),
                name: plan.base_name.clone(),
                file_type: plan.file_type.clone(),
            });
            return Ok(Attempt::Done(ExportOutcome::NoPermission));
        }

        if plan.extension != plan.file_type.to_lowercase() {
            info!(extension = %plan.extension, "link resolves to its source file type");
        }
        tokio::fs::create_dir_all(&plan.dest_dir)
            .await
            .map_err(|e| SessionError::io(&plan.dest_dir, e))?;
        self.browser
            .configure_download(&DownloadTarget {
                dir: plan.dest_dir.clone(),
                file_name: plan.base_name.clone(),
                if_exists: IfExists::Skip,
            })
            .await?;
        tokio::time::sleep(self.ctx.timings.export_pause).await;

        let category = FileCategory::classify(&plan.extension);
        debug!(?category, "running export strategy");
        match self.run_strategy(category, plan).await {
            StrategyResult::Started(id) => self.finish_download(node, plan, &id).await,
            StrategyResult::SavedInline(path) => Ok(Attempt::Done(ExportOutcome::SavedInline(path))),
            StrategyResult::NoControl => Ok(Attempt::Retry("no export control produced a download")),
            StrategyResult::Unsupported => {
                self.ctx.ledger.record_skipped(SkippedEntry {
                    name: plan.base_name.clone(),
                    file_type: plan.file_type.clone(),
                    reason: UNKNOWN_FORMAT.to_string(),
                });
                Ok(Attempt::Done(ExportOutcome::Skipped))
            }
        }
    }

    async fn shows_no_permission(&mut self) -> Result<bool, SessionError> {
        let banners = self
            .browser
            .find_all(&permission_banner(), self.ctx.timings.probe_timeout)
            .await?;
        for banner in &banners {
            if self.browser.text(banner).await?.contains(NO_PERMISSION_TEXT) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Waits for a started download and decides what became of it.
    async fn finish_download(
        &mut self,
        node: &Node,
        plan: &ExportPlan,
        id: &DownloadId,
    ) -> Result<Attempt, SessionError> {
        let timings = self.ctx.timings;
        let mut wait = BoundedWait::new(timings.download_finish_timeout, timings.download_poll);
        let status = loop {
            let status = self.browser.download_status(id).await?;
            if status.is_done() {
                break status;
            }
            if !wait.pause().await {
                return Ok(Attempt::Retry("download did not finish in time"));
            }
        };

        if status.final_path.is_some() || status.state == DownloadState::Skipped {
            return Ok(Attempt::Done(ExportOutcome::Completed(status.final_path)));
        }
        if !status.url.is_empty() && !status.url.contains("blob") {
            info!(url = %status.url, state = ?status.state, "browser download failed; handing to fallback");
            self.ctx.download_queue.push(DownloadTask {
                node: node.clone(),
                url: status.url,
                request: self.last_request.clone(),
                dest_dir: plan.dest_dir.clone(),
                base_name: plan.base_name.clone(),
            });
            return Ok(Attempt::Done(ExportOutcome::HandedToFallback));
        }
        Ok(Attempt::Retry("download ended without a file"))
    }
}

/// `true` when `dir` exists and has at least one entry.
async fn has_content(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}
