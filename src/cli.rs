//! CLI argument definitions using clap derive macros.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

use harvester_core::config::{
    KEY_DOWNLOAD_WORKERS, KEY_OUTPUT_DIR, KEY_REPLAY_WORKERS, KEY_SESSIONS,
};

/// Default env file, read when present.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Crawl a cloud document workspace and export every file.
///
/// Harvester drives real browser sessions through the workspace tree. Log in
/// in every opened browser, confirm at the prompt, and confirm again once the
/// downloads are done to get the report.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Env-style settings file (default: .env when present)
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Directory for the exported library, logs and report
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Browser sessions to run (1-32)
    #[arg(short = 's', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub sessions: Option<u8>,

    /// Listing replay workers (1-32)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub replay_workers: Option<u8>,

    /// Fallback download workers (1-32)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub download_workers: Option<u8>,

    /// Directory holding the per-session browser profiles
    #[arg(long, value_name = "DIR", default_value = "profiles")]
    pub profile_dir: PathBuf,

    /// First remote-debugging port; session i uses base + i
    #[arg(long, default_value_t = 9222)]
    pub base_port: u16,

    /// Run the browsers without a window
    #[arg(long)]
    pub headless: bool,
}

impl Args {
    /// The env file to read and whether it must exist.
    #[must_use]
    pub fn env_file(&self) -> (PathBuf, bool) {
        match &self.env_file {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_ENV_FILE), false),
        }
    }

    /// Writes the flags that were given over the merged settings.
    pub fn apply_overrides(&self, entries: &mut BTreeMap<String, String>) {
        if let Some(dir) = &self.output_dir {
            entries.insert(KEY_OUTPUT_DIR.to_string(), dir.display().to_string());
        }
        for (key, value) in [
            (KEY_SESSIONS, self.sessions),
            (KEY_REPLAY_WORKERS, self.replay_workers),
            (KEY_DOWNLOAD_WORKERS, self.download_workers),
        ] {
            if let Some(value) = value {
                entries.insert(key.to_string(), value.to_string());
            }
        }
    }
}
