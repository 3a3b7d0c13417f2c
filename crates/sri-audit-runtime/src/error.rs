//! Runtime error types.

/// Failures specific to driving a crawl.
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("Chromium not found; pass --chromium or set SRI_AUDIT_CHROMIUM_PATH")]
    BrowserNotFound,

    #[error("crawl of {target} timed out after {after_ms}ms")]
    TimedOut { target: String, after_ms: u64 },
}
