//! Custom error types for acmclusters.
//!
//! All library functions return `Result<T, AcmError>`; the binary wraps them
//! with `anyhow` context.

use thiserror::Error;

/// Main error type for acmclusters operations.
#[derive(Debug, Error)]
pub enum AcmError {
    /// Browser automation error (WebDriver session, navigation)
    #[error("Browser error: {0}")]
    Browser(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No element matched the selector on the current page
    #[error("Element not found: {selector}")]
    ElementNotFound {
        /// CSS selector(s) that were tried
        selector: String,
    },

    /// Bounded wait expired before the element became visible
    #[error("Timed out after {waited_ms}ms waiting for {selector}")]
    Timeout {
        /// CSS selector that was awaited
        selector: String,
        /// Wait budget in milliseconds
        waited_ms: u128,
    },

    /// Publication date text not in the "DD Month YYYY" format
    #[error("Cannot parse publication date {input:?}")]
    DateParse {
        /// Raw text read from the page
        input: String,
    },

    /// Malformed response or document
    #[error("Parse error: {0}")]
    Parse(String),

    /// Language resource could not be loaded or fetched
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Not enough documents for a statistical step
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Feature store failure
    #[error("Store error: {0}")]
    Store(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization/deserialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AcmError {
    /// Failures caused by the content of the page being extracted, as
    /// opposed to the browser, the network or the store.
    pub fn is_extraction_failure(&self) -> bool {
        matches!(
            self,
            AcmError::ElementNotFound { .. } | AcmError::Timeout { .. } | AcmError::DateParse { .. }
        )
    }
}

/// Result type alias using `AcmError`
pub type Result<T> = std::result::Result<T, AcmError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AcmError::Parse(msg.to_string()))
    }
}
