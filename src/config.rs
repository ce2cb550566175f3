//! Run configuration: workspace identity, worker counts, timings and budgets.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. an environment-style `KEY=VALUE` file (`.env` by default)
//! 2. the process environment
//! 3. command-line flags (applied by the binary)
//!
//! Timings and retry budgets are plain values so tests can run the whole
//! engine with [`CrawlTimings::instant`].

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::download::RetryPolicy;

/// Workspace host used when none is configured.
pub const DEFAULT_BASE_URL: &str = "https://alidocs.dingtalk.com";

/// Default number of each worker kind.
pub const DEFAULT_WORKERS: usize = 5;

/// Accepted range for every worker count.
pub const WORKER_RANGE: RangeInclusive<usize> = 1..=32;

/// Substring identifying a "list children" request.
pub const LISTING_ENDPOINT: &str = "/dentry/list?";

/// URL pattern the browser listener tracks.
pub const LISTING_LISTEN_PATTERN: &str = "box/api/v2/dentry/list?";

/// Workspace/organization id.
pub const KEY_CORP_ID: &str = "CORP_ID";
/// Target library id.
pub const KEY_TARGET_ORGID: &str = "TARGET_ORGID";
/// Workspace host override.
pub const KEY_BASE_URL: &str = "HARVESTER_BASE_URL";
/// Output root override.
pub const KEY_OUTPUT_DIR: &str = "HARVESTER_OUTPUT_DIR";
/// Session driver count.
pub const KEY_SESSIONS: &str = "HARVESTER_SESSIONS";
/// Replay worker count.
pub const KEY_REPLAY_WORKERS: &str = "HARVESTER_REPLAY_WORKERS";
/// Fallback download worker count.
pub const KEY_DOWNLOAD_WORKERS: &str = "HARVESTER_DOWNLOAD_WORKERS";

const KNOWN_KEYS: [&str; 7] = [
    KEY_CORP_ID,
    KEY_TARGET_ORGID,
    KEY_BASE_URL,
    KEY_OUTPUT_DIR,
    KEY_SESSIONS,
    KEY_REPLAY_WORKERS,
    KEY_DOWNLOAD_WORKERS,
];

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but cannot be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not `KEY=VALUE`.
    #[error("invalid config syntax on line {line}: {reason}")]
    Syntax {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// A recognized key has an unusable value.
    #[error("invalid value for `{key}`: {value:?} ({reason})")]
    InvalidValue {
        /// The key.
        key: String,
        /// The raw value.
        value: String,
        /// What was wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parses environment-style file contents.
///
/// Blank lines and `#` comments are ignored, an optional `export ` prefix is
/// accepted, and values may be wrapped in single or double quotes. Unquoted
/// values may carry a trailing ` # comment`.
///
/// # Errors
///
/// Returns [`ConfigError::Syntax`] for a line without `=` or with an empty key.
pub fn parse_env_str(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut entries = BTreeMap::new();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax {
                line: line_index + 1,
                reason: "expected KEY=VALUE".to_string(),
            });
        };
        let key = raw_key.trim();
        if key.is_empty() {
            return Err(ConfigError::Syntax {
                line: line_index + 1,
                reason: "empty key".to_string(),
            });
        }
        entries.insert(key.to_string(), parse_value(raw_value.trim()));
    }
    Ok(entries)
}

fn parse_value(raw: &str) -> String {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    match raw.find(" #") {
        Some(idx) => raw[..idx].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Loads an environment-style file.
///
/// A missing file yields an empty map unless `required` is set.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read (or is missing
/// and required), or [`ConfigError::Syntax`] for malformed lines.
pub fn load_env_file(path: &Path, required: bool) -> Result<BTreeMap<String, String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let entries = parse_env_str(&raw)?;
            debug!(path = %path.display(), keys = entries.len(), "loaded env file");
            Ok(entries)
        }
        Err(e) if e.kind() == ErrorKind::NotFound && !required => {
            debug!(path = %path.display(), "no env file");
            Ok(BTreeMap::new())
        }
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Overlays the recognized keys from the process environment onto `file`.
#[must_use]
pub fn overlay_process_env(mut file: BTreeMap<String, String>) -> BTreeMap<String, String> {
    for key in KNOWN_KEYS {
        if let Ok(value) = std::env::var(key) {
            file.insert(key.to_string(), value);
        }
    }
    file
}

/// Workspace identity and the URLs derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Scheme and host, without a trailing slash.
    pub base_url: String,
    /// Workspace/organization id.
    pub corp_id: String,
    /// Target library id.
    pub library_id: String,
}

impl WorkspaceConfig {
    /// Creates a config; a trailing `/` on `base_url` is dropped.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        corp_id: impl Into<String>,
        library_id: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            corp_id: corp_id.into(),
            library_id: library_id.into(),
        }
    }

    /// Page every session opens before login.
    #[must_use]
    pub fn entry_url(&self) -> String {
        format!("{}/i/desktop/spaces/?corpId={}", self.base_url, self.corp_id)
    }

    /// Overview page of the target library.
    #[must_use]
    pub fn library_url(&self) -> String {
        format!(
            "{}/i/spaces/{}/overview?corpId={}",
            self.base_url, self.library_id, self.corp_id
        )
    }

    /// Canonical page of one node.
    #[must_use]
    pub fn node_url(&self, dentry_uuid: &str) -> String {
        format!("{}/i/nodes/{dentry_uuid}", self.base_url)
    }
}

/// How many workers of each kind a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCounts {
    /// Session drivers, one browser each.
    pub sessions: usize,
    /// Listing replay workers.
    pub replay_workers: usize,
    /// Fallback download workers.
    pub download_workers: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            sessions: DEFAULT_WORKERS,
            replay_workers: DEFAULT_WORKERS,
            download_workers: DEFAULT_WORKERS,
        }
    }
}

impl WorkerCounts {
    /// Checks every count against [`WORKER_RANGE`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first count out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            (KEY_SESSIONS, self.sessions),
            (KEY_REPLAY_WORKERS, self.replay_workers),
            (KEY_DOWNLOAD_WORKERS, self.download_workers),
        ] {
            if !WORKER_RANGE.contains(&value) {
                return Err(ConfigError::invalid(
                    key,
                    &value.to_string(),
                    format!(
                        "expected range {}..={}",
                        WORKER_RANGE.start(),
                        WORKER_RANGE.end()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Resolved settings before command-line overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Workspace identity.
    pub workspace: WorkspaceConfig,
    /// Root under which the library directory and logs are written.
    pub output_dir: PathBuf,
    /// Worker counts.
    pub workers: WorkerCounts,
}

impl Settings {
    /// Builds settings from merged key/value pairs.
    ///
    /// Missing workspace ids are accepted with a warning; the URLs then carry
    /// empty segments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a non-numeric or out-of-range
    /// worker count.
    pub fn from_entries(entries: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| entries.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let corp_id = get(KEY_CORP_ID).unwrap_or_default();
        let library_id = get(KEY_TARGET_ORGID).unwrap_or_default();
        if corp_id.is_empty() {
            warn!("{KEY_CORP_ID} is not set; workspace URLs will be incomplete");
        }
        if library_id.is_empty() {
            warn!("{KEY_TARGET_ORGID} is not set; workspace URLs will be incomplete");
        }

        let workers = WorkerCounts {
            sessions: parse_count(KEY_SESSIONS, get(KEY_SESSIONS))?,
            replay_workers: parse_count(KEY_REPLAY_WORKERS, get(KEY_REPLAY_WORKERS))?,
            download_workers: parse_count(KEY_DOWNLOAD_WORKERS, get(KEY_DOWNLOAD_WORKERS))?,
        };
        workers.validate()?;

        Ok(Self {
            workspace: WorkspaceConfig::new(
                get(KEY_BASE_URL).unwrap_or(DEFAULT_BASE_URL),
                corp_id,
                library_id,
            ),
            output_dir: PathBuf::from(get(KEY_OUTPUT_DIR).unwrap_or(".")),
            workers,
        })
    }

    /// Directory that mirrors the remote library tree.
    #[must_use]
    pub fn library_root(&self) -> PathBuf {
        self.output_dir.join(&self.workspace.library_id)
    }
}

fn parse_count(key: &str, value: Option<&str>) -> Result<usize, ConfigError> {
    match value {
        None => Ok(DEFAULT_WORKERS),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|e| ConfigError::invalid(key, raw, e.to_string())),
    }
}

/// Pauses, polls and timeouts of the crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlTimings {
    /// Poll interval of the quiescence wait; also its initial pause.
    pub settle_poll: Duration,
    /// Upper bound of one quiescence wait.
    pub settle_timeout: Duration,
    /// Pause after an iteration that found no work.
    pub idle_pause: Duration,
    /// Bound of the cheap, no-scroll element probe.
    pub probe_timeout: Duration,
    /// Bound of the probe after each scroll step.
    pub scroll_probe_timeout: Duration,
    /// Short pause between UI steps (menus, scroll to top).
    pub ui_pause: Duration,
    /// Pause after configuring the download target, before exporting.
    pub export_pause: Duration,
    /// Pause between two attempts of an export route.
    pub strategy_pause: Duration,
    /// Bound for locating a download or export control.
    pub control_timeout: Duration,
    /// Bound for one size-limit confirmation probe.
    pub confirm_timeout: Duration,
    /// How long a click may take to start a download.
    pub download_start_timeout: Duration,
    /// Poll interval while a download is in progress.
    pub download_poll: Duration,
    /// Upper bound for a started download to finish.
    pub download_finish_timeout: Duration,
}

impl Default for CrawlTimings {
    fn default() -> Self {
        Self {
            settle_poll: Duration::from_secs(1),
            settle_timeout: Duration::from_secs(60),
            idle_pause: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            scroll_probe_timeout: Duration::from_secs(3),
            ui_pause: Duration::from_millis(500),
            export_pause: Duration::from_secs(5),
            strategy_pause: Duration::from_secs(3),
            control_timeout: Duration::from_secs(5),
            confirm_timeout: Duration::from_millis(500),
            download_start_timeout: Duration::from_secs(120),
            download_poll: Duration::from_millis(500),
            download_finish_timeout: Duration::from_secs(600),
        }
    }
}

impl CrawlTimings {
    /// Zero pauses and zero waits; every wait probes exactly once.
    #[must_use]
    pub fn instant() -> Self {
        Self {
            settle_poll: Duration::ZERO,
            settle_timeout: Duration::ZERO,
            idle_pause: Duration::ZERO,
            probe_timeout: Duration::ZERO,
            scroll_probe_timeout: Duration::ZERO,
            ui_pause: Duration::ZERO,
            export_pause: Duration::ZERO,
            strategy_pause: Duration::ZERO,
            control_timeout: Duration::ZERO,
            confirm_timeout: Duration::ZERO,
            download_start_timeout: Duration::ZERO,
            download_poll: Duration::ZERO,
            download_finish_timeout: Duration::ZERO,
        }
    }
}

/// Attempt budgets of every retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudgets {
    /// Attempts of `process_node` per dequeued node.
    pub node_attempts: u32,
    /// Retries of a file export after the first attempt.
    pub file_retries: u32,
    /// A full page reload happens on the retry right after this many.
    pub reload_after: u32,
    /// Whole scroll-to-locate restarts.
    pub locate_retries: u32,
    /// Folder row lookups without re-navigating, per node attempt.
    pub folder_locate_attempts: u32,
    /// Attempts of one export route.
    pub strategy_attempts: u32,
    /// Probes for the size-limit confirmation after an export click.
    pub confirm_probes: u32,
    /// Consecutive empty iterations before a session terminates.
    pub idle_rounds: u32,
    /// Scroll step in pixels.
    pub scroll_step: i64,
    /// Listing replay attempts.
    pub replay: RetryPolicy,
    /// Fallback download attempts.
    pub fallback: RetryPolicy,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            node_attempts: 4,
            file_retries: 5,
            reload_after: 2,
            locate_retries: 5,
            folder_locate_attempts: 3,
            strategy_attempts: 5,
            confirm_probes: 2,
            idle_rounds: 30,
            scroll_step: 300,
            replay: RetryPolicy::default(),
            fallback: RetryPolicy::default(),
        }
    }
}

impl RetryBudgets {
    /// Production budgets with zero pauses between HTTP attempts.
    #[must_use]
    pub fn instant() -> Self {
        let defaults = Self::default();
        Self {
            replay: RetryPolicy::new(defaults.replay.max_attempts(), Duration::ZERO),
            fallback: RetryPolicy::new(defaults.fallback.max_attempts(), Duration::ZERO),
            ..defaults
        }
    }
}
