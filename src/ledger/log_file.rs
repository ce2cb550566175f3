//! Append-only, line-oriented outcome log on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;
use tracing::{debug, error};

use super::LedgerError;

/// Timestamp format of every log line and header.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub(crate) fn local_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One durable outcome log.
///
/// Lines are appended synchronously so a crash loses nothing already
/// recorded. Appends from concurrent workers are serialized.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogFile {
    /// Rotates any existing log at `path` to `<path>.bak` and starts a fresh
    /// one with a two-line `#` header.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Io`] if the backup or the new file cannot be written.
    pub fn rotate_and_create(path: &Path, title: &str) -> Result<Self, LedgerError> {
        if path.exists() {
            let backup = backup_path(path);
            match fs::remove_file(&backup) {
                Ok(()) => debug!(path = %backup.display(), "removed previous backup"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(LedgerError::io(&backup, e)),
            }
            fs::rename(path, &backup).map_err(|e| LedgerError::io(path, e))?;
            debug!(from = %path.display(), to = %backup.display(), "rotated log");
        }

        let mut file = File::create(path).map_err(|e| LedgerError::io(path, e))?;
        let header = format!(
            "# {title} - created: {}\n# format: [timestamp] entry\n\n",
            local_timestamp()
        );
        file.write_all(header.as_bytes())
            .map_err(|e| LedgerError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `[<timestamp>] <entry>` as one line.
    ///
    /// Write failures are logged, not returned: the in-memory record stays
    /// authoritative for the running process.
    pub fn append(&self, entry: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let line = format!("[{}] {entry}\n", local_timestamp());
        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            error!(path = %self.path.display(), error = %e, "failed to append outcome log");
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_create_writes_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failed_files.log");
        let log = LogFile::rotate_and_create(&path, "Failed files").unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("# Failed files - created: "));
        assert!(lines[1].starts_with("# format:"));
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_rotation_replaces_previous_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skipped_files.log");
        fs::write(dir.path().join("skipped_files.log.bak"), "oldest").unwrap();
        fs::write(&path, "previous run").unwrap();

        LogFile::rotate_and_create(&path, "Skipped files").unwrap();

        let backup = fs::read_to_string(dir.path().join("skipped_files.log.bak")).unwrap();
        assert_eq!(backup, "previous run");
        assert!(fs::read_to_string(&path).unwrap().starts_with("# Skipped files"));
    }

    #[test]
    fn test_append_prefixes_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no_right_files.log");
        let log = LogFile::rotate_and_create(&path, "No-permission files").unwrap();

        log.append("[adoc] Root/Team/Plan");

        let content = fs::read_to_string(&path).unwrap();
        let last = content.lines().last().unwrap();
        assert!(last.starts_with('['));
        assert!(last.ends_with("] [adoc] Root/Team/Plan"));
        // "[YYYY-mm-dd HH:MM:SS] " is 22 bytes.
        assert_eq!(&last[21..], " [adoc] Root/Team/Plan");
    }
}
