//! Error types for the browser capability surface.

use thiserror::Error;

/// Errors raised by a [`BrowserSession`](super::BrowserSession) implementation.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No element matched within the allowed time.
    #[error("element not found: {locator}")]
    ElementNotFound {
        /// Rendered locator that was searched for.
        locator: String,
    },

    /// An element handle no longer refers to a live element.
    #[error("stale element reference: {element}")]
    StaleElement {
        /// The stale handle.
        element: String,
    },

    /// Navigation or reload failed.
    #[error("navigation to {url} failed: {reason}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Driver-reported reason.
        reason: String,
    },

    /// A page script threw or returned something unusable.
    #[error("script failed: {reason}")]
    Script {
        /// What went wrong.
        reason: String,
    },

    /// Download configuration or tracking failed.
    #[error("download error: {reason}")]
    Download {
        /// What went wrong.
        reason: String,
    },

    /// The session was closed.
    #[error("browser session closed")]
    Closed,

    /// Launch or protocol-level failure of the underlying driver.
    #[error("browser driver error: {reason}")]
    Driver {
        /// Driver-reported reason.
        reason: String,
    },
}

impl BrowserError {
    /// Creates an element-not-found error.
    pub fn element_not_found(locator: impl ToString) -> Self {
        Self::ElementNotFound {
            locator: locator.to_string(),
        }
    }

    /// Creates a stale-element error.
    pub fn stale(element: impl ToString) -> Self {
        Self::StaleElement {
            element: element.to_string(),
        }
    }

    /// Creates a navigation error.
    pub fn navigation(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a script error.
    pub fn script(reason: impl ToString) -> Self {
        Self::Script {
            reason: reason.to_string(),
        }
    }

    /// Creates a download error.
    pub fn download(reason: impl ToString) -> Self {
        Self::Download {
            reason: reason.to_string(),
        }
    }

    /// Creates a driver error.
    pub fn driver(reason: impl ToString) -> Self {
        Self::Driver {
            reason: reason.to_string(),
        }
    }
}
