//! Error types for session-level operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::browser::{BrowserError, Locator};

/// Errors from processing one node inside a browser session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser capability surface failed.
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// The node's tree row could not be brought into the DOM.
    #[error("tree row for {dentry_uuid} not found")]
    RowNotFound {
        /// Node identifier.
        dentry_uuid: String,
    },

    /// A control a route depends on never appeared.
    #[error("control {locator} not found")]
    ControlMissing {
        /// Display form of the missing control's locator.
        locator: String,
    },

    /// Local filesystem work failed.
    #[error("filesystem error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    /// Creates a row-not-found error.
    pub fn row_not_found(dentry_uuid: impl Into<String>) -> Self {
        Self::RowNotFound {
            dentry_uuid: dentry_uuid.into(),
        }
    }

    /// Creates a missing-control error.
    pub fn control_missing(locator: &Locator) -> Self {
        Self::ControlMissing {
            locator: locator.to_string(),
        }
    }

    /// Creates a filesystem error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
