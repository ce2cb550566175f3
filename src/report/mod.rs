//! End-of-run report: counts, full ledger listings and a failure tally.
//!
//! The same [`RunReport`] renders two views: the full text written to
//! `download_report.txt`, and a console summary capped at
//! [`CONSOLE_LIMIT`] entries per ledger.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ledger::{
    FailedEntry, LogPaths, NoPermissionEntry, OutcomeLedger, SkippedEntry, local_timestamp,
};
use crate::queue::ClaimSet;

/// File name of the written report.
pub const REPORT_FILE: &str = "download_report.txt";

/// Entries shown per ledger in the console summary.
pub const CONSOLE_LIMIT: usize = 20;

const RULE_WIDTH: usize = 80;

/// Snapshot of a run's terminal outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Local time the snapshot was taken.
    pub generated_at: String,
    /// Size of the processed-file set.
    pub files_processed: usize,
    /// Size of the processed-node set.
    pub nodes_visited: usize,
    /// No-permission ledger.
    pub no_permission: Vec<NoPermissionEntry>,
    /// Download-failed ledger.
    pub failed: Vec<FailedEntry>,
    /// Skipped ledger.
    pub skipped: Vec<SkippedEntry>,
    /// Durable log locations, when the ledger was opened on disk.
    pub log_paths: Option<LogPaths>,
}

impl RunReport {
    /// Takes a snapshot of the registries and ledgers.
    #[must_use]
    pub fn collect(files: &ClaimSet, nodes: &ClaimSet, ledger: &OutcomeLedger) -> Self {
        Self {
            generated_at: local_timestamp(),
            files_processed: files.len(),
            nodes_visited: nodes.len(),
            no_permission: ledger.no_permission(),
            failed: ledger.failed(),
            skipped: ledger.skipped(),
            log_paths: ledger.log_paths(),
        }
    }

    /// Failure reasons with their counts, most frequent first.
    #[must_use]
    pub fn failure_reasons(&self) -> Vec<(String, usize)> {
        let mut tally: HashMap<&str, usize> = HashMap::new();
        for entry in &self.failed {
            *tally.entry(entry.reason.as_str()).or_default() += 1;
        }
        let mut reasons: Vec<(String, usize)> = tally
            .into_iter()
            .map(|(reason, count)| (reason.to_string(), count))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        reasons
    }

    /// Full report text.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Console summary: counts plus at most [`CONSOLE_LIMIT`] entries per ledger.
    #[must_use]
    pub fn render_summary(&self) -> String {
        Summary(self).to_string()
    }

    /// Writes [`render`](Self::render) to `dir/download_report.txt`.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file cannot be written.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE);
        std::fs::write(&path, self.render())?;
        info!(path = %path.display(), "report written");
        Ok(path)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(out, "Download report")?;
        writeln!(out, "{}\n", "=".repeat(RULE_WIDTH))?;
        writeln!(out, "Generated: {}\n", self.generated_at)?;

        writeln!(out, "Statistics:")?;
        writeln!(out, "  - files processed: {}", self.files_processed)?;
        writeln!(out, "  - nodes visited: {}", self.nodes_visited)?;
        writeln!(out, "  - no permission: {}", self.no_permission.len())?;
        writeln!(out, "  - download failed: {}", self.failed.len())?;
        writeln!(out, "  - skipped: {}\n", self.skipped.len())?;

        if let Some(paths) = &self.log_paths {
            writeln!(out, "Log files:")?;
            write_log_paths(out, paths)?;
            writeln!(out)?;
        }

        write_full(out, "No permission", &self.no_permission, no_permission_line)?;
        write_full(out, "Download failed", &self.failed, failed_line)?;
        write_full(out, "Skipped", &self.skipped, skipped_line)?;

        writeln!(out, "Failure reasons:")?;
        writeln!(out, "{}", "-".repeat(40))?;
        for (reason, count) in self.failure_reasons() {
            writeln!(out, "  {reason}: {count} files")?;
        }
        writeln!(out)
    }
}

/// Console view of a report.
struct Summary<'a>(&'a RunReport);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(out, "\n{rule}\nRun complete\n{rule}")?;
        writeln!(out, "\nStatistics:")?;
        writeln!(out, "  - files processed: {}", report.files_processed)?;
        writeln!(out, "  - nodes visited: {}", report.nodes_visited)?;

        write_capped(out, "No permission", &report.no_permission, no_permission_line)?;
        write_capped(out, "Download failed", &report.failed, failed_line)?;
        write_capped(out, "Skipped", &report.skipped, skipped_line)?;

        if let Some(paths) = &report.log_paths {
            writeln!(out, "\nOutcome logs:")?;
            write_log_paths(out, paths)?;
        }
        writeln!(out, "\n{rule}")
    }
}

fn write_log_paths(out: &mut fmt::Formatter<'_>, paths: &LogPaths) -> fmt::Result {
    writeln!(out, "  - failed: {}", absolute(&paths.failed).display())?;
    writeln!(out, "  - no permission: {}", absolute(&paths.no_permission).display())?;
    writeln!(out, "  - skipped: {}", absolute(&paths.skipped).display())
}

fn write_full<E>(
    out: &mut fmt::Formatter<'_>,
    title: &str,
    entries: &[E],
    line: fn(&E) -> String,
) -> fmt::Result {
    if entries.is_empty() {
        return Ok(());
    }
    writeln!(out, "{title} ({}):", entries.len())?;
    for entry in entries {
        writeln!(out, "  {}", line(entry))?;
    }
    writeln!(out)
}

fn write_capped<E>(
    out: &mut fmt::Formatter<'_>,
    title: &str,
    entries: &[E],
    line: fn(&E) -> String,
) -> fmt::Result {
    if entries.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n{title} ({}):", entries.len())?;
    for (i, entry) in entries.iter().take(CONSOLE_LIMIT).enumerate() {
        writeln!(out, "  {:2}. {}", i + 1, line(entry))?;
    }
    if entries.len() > CONSOLE_LIMIT {
        writeln!(out, "     ... and {} more", entries.len() - CONSOLE_LIMIT)?;
    }
    Ok(())
}

fn no_permission_line(entry: &NoPermissionEntry) -> String {
    format!("[{}] {}/{}", entry.file_type, entry.path, entry.name)
}

fn failed_line(entry: &FailedEntry) -> String {
    format!("{} - {}", entry.name, entry.reason)
}

fn skipped_line(entry: &SkippedEntry) -> String {
    format!("[{}] {} - {}", entry.file_type, entry.name, entry.reason)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
