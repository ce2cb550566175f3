//! Constants for the download module (timeouts, header filtering).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Captured request headers that must not be replayed verbatim.
///
/// HTTP/2 pseudo-headers (`:authority`, `:path`, ...) are filtered separately
/// by their leading colon.
pub const DROPPED_HEADERS: [&str; 2] = ["host", "connection"];
