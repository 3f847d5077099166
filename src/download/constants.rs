//! Constants for the download module (timeouts).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout for pages and images (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default whole-archive request timeout (30 seconds).
///
/// Exceeding it switches the run to per-page fetching.
pub const DEFAULT_ARCHIVE_TIMEOUT_MS: u64 = 30_000;
