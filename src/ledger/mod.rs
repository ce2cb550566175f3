//! Outcome ledgers: the three terminal classifications of a run.
//!
//! Each ledger is an in-memory, append-only list mirrored line-by-line to a
//! durable log file, so the historical record survives a crash even though
//! the in-memory dedup state does not.
//!
//! | Ledger | Log file | Line after the timestamp |
//! |--------|----------|--------------------------|
//! | no permission | `no_right_files.log` | `[{type}] {path}/{name}` |
//! | download failed | `failed_files.log` | `{name} \| {reason} \| {url_or_type}` |
//! | skipped | `skipped_files.log` | `[{type}] {name} \| {reason}` |

mod log_file;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

pub use log_file::LogFile;
pub(crate) use log_file::local_timestamp;

/// File name of the no-permission log.
pub const NO_PERMISSION_LOG: &str = "no_right_files.log";
/// File name of the download-failed log.
pub const FAILED_LOG: &str = "failed_files.log";
/// File name of the skipped log.
pub const SKIPPED_LOG: &str = "skipped_files.log";

/// Errors opening the ledger logs.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A log or its backup could not be written.
    #[error("IO error on ledger log {path}: {source}")]
    Io {
        /// The log path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A file the user is not allowed to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoPermissionEntry {
    /// Sanitized ancestor path, `/`-joined.
    pub path: String,
    /// Sanitized base name.
    pub name: String,
    /// File type as derived from the name.
    pub file_type: String,
}

/// A file that could not be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    /// Sanitized base name.
    pub name: String,
    /// Why it failed.
    pub reason: String,
    /// The URL that was tried, or the file type.
    pub url_or_type: String,
}

/// A file skipped because no export route exists for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Sanitized base name.
    pub name: String,
    /// File type as derived from the name.
    pub file_type: String,
    /// Why it was skipped.
    pub reason: String,
}

impl NoPermissionEntry {
    fn log_line(&self) -> String {
        format!("[{}] {}/{}", self.file_type, self.path, self.name)
    }
}

impl FailedEntry {
    fn log_line(&self) -> String {
        format!("{} | {} | {}", self.name, self.reason, self.url_or_type)
    }
}

impl SkippedEntry {
    fn log_line(&self) -> String {
        format!("[{}] {} | {}", self.file_type, self.name, self.reason)
    }
}

/// Absolute locations of the three logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// `failed_files.log`
    pub failed: PathBuf,
    /// `no_right_files.log`
    pub no_permission: PathBuf,
    /// `skipped_files.log`
    pub skipped: PathBuf,
}

#[derive(Debug)]
struct Ledger<E> {
    entries: Mutex<Vec<E>>,
    log: Option<LogFile>,
}

impl<E: Clone + PartialEq> Ledger<E> {
    fn new(log: Option<LogFile>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            log,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<E>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `entry` unless an identical one is present; mirrors to the log.
    fn record(&self, entry: E, line: impl FnOnce(&E) -> String) -> bool {
        let mut entries = self.lock();
        if entries.contains(&entry) {
            return false;
        }
        if let Some(log) = &self.log {
            log.append(&line(&entry));
        }
        entries.push(entry);
        true
    }

    fn snapshot(&self) -> Vec<E> {
        self.lock().clone()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// The three outcome ledgers of a run.
///
/// Safe to share between workers; every `record_*` call is atomic with its
/// log write and returns `false` for a duplicate entry.
#[derive(Debug)]
pub struct OutcomeLedger {
    no_permission: Ledger<NoPermissionEntry>,
    failed: Ledger<FailedEntry>,
    skipped: Ledger<SkippedEntry>,
}

impl Default for OutcomeLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl OutcomeLedger {
    /// Ledgers without durable logs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            no_permission: Ledger::new(None),
            failed: Ledger::new(None),
            skipped: Ledger::new(None),
        }
    }

    /// Ledgers mirrored to fresh logs in `dir`, rotating a previous run's logs.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if a log cannot be rotated or created.
    pub fn open(dir: &Path) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(dir).map_err(|e| LedgerError::io(dir, e))?;
        let failed = LogFile::rotate_and_create(&dir.join(FAILED_LOG), "Failed files log")?;
        let no_permission =
            LogFile::rotate_and_create(&dir.join(NO_PERMISSION_LOG), "No-permission files log")?;
        let skipped = LogFile::rotate_and_create(&dir.join(SKIPPED_LOG), "Skipped files log")?;
        info!(dir = %dir.display(), "outcome logs initialized");
        Ok(Self {
            no_permission: Ledger::new(Some(no_permission)),
            failed: Ledger::new(Some(failed)),
            skipped: Ledger::new(Some(skipped)),
        })
    }

    /// Records a no-permission outcome.
    pub fn record_no_permission(&self, entry: NoPermissionEntry) -> bool {
        debug!(name = %entry.name, "recording no-permission");
        self.no_permission.record(entry, NoPermissionEntry::log_line)
    }

    /// Records a download failure.
    pub fn record_failed(&self, entry: FailedEntry) -> bool {
        debug!(name = %entry.name, reason = %entry.reason, "recording failure");
        self.failed.record(entry, FailedEntry::log_line)
    }

    /// Records a skipped file.
    pub fn record_skipped(&self, entry: SkippedEntry) -> bool {
        debug!(name = %entry.name, reason = %entry.reason, "recording skip");
        self.skipped.record(entry, SkippedEntry::log_line)
    }

    /// Snapshot of the no-permission ledger.
    #[must_use]
    pub fn no_permission(&self) -> Vec<NoPermissionEntry> {
        self.no_permission.snapshot()
    }

    /// Snapshot of the download-failed ledger.
    #[must_use]
    pub fn failed(&self) -> Vec<FailedEntry> {
        self.failed.snapshot()
    }

    /// Snapshot of the skipped ledger.
    #[must_use]
    pub fn skipped(&self) -> Vec<SkippedEntry> {
        self.skipped.snapshot()
    }

    /// Entry counts as `(no_permission, failed, skipped)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.no_permission.len(),
            self.failed.len(),
            self.skipped.len(),
        )
    }

    /// Paths of the durable logs, if the ledger was opened on disk.
    #[must_use]
    pub fn log_paths(&self) -> Option<LogPaths> {
        Some(LogPaths {
            failed: self.failed.log.as_ref()?.path().to_path_buf(),
            no_permission: self.no_permission.log.as_ref()?.path().to_path_buf(),
            skipped: self.skipped.log.as_ref()?.path().to_path_buf(),
        })
    }
}
