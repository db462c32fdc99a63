//! Error types for sentiscope
//!
//! One variant per failure kind the pipeline can surface. Duplicate-only
//! imports are not errors; see [`crate::controller::ImportOutcome`].

use thiserror::Error;

/// Main error type for sentiscope operations
#[derive(Error, Debug)]
pub enum SentiscopeError {
    /// Input could not be recovered as structured data by any repair strategy
    #[error("Import parse error: {message}{}", snippet_suffix(.snippet))]
    ImportParse {
        message: String,
        offset: Option<usize>,
        snippet: Option<String>,
    },

    /// The working set holds no record with non-empty text
    #[error("No analyzable data: every record lacks text")]
    NoAnalyzableData,

    /// One batch of an analysis run failed or returned a malformed payload
    #[error("Batch {batch} failed: {message}")]
    BatchSubmission { batch: usize, message: String },

    /// The backend could not be reached at the connection level
    #[error("Backend unavailable: {0}")]
    RemoteUnavailable(String),

    /// A second analysis run was requested while one is in flight
    #[error("An analysis run is already in progress")]
    AnalysisInProgress,

    /// Backend answered with a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A remote call exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (search terms, empty store on export, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network errors that are not connection failures
    #[error("Network error: {0}")]
    Network(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn snippet_suffix(snippet: &Option<String>) -> String {
    match snippet {
        Some(s) => format!("\nProblem area: \"{}\"", s),
        None => String::new(),
    }
}

impl SentiscopeError {
    /// Whether a bounded retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SentiscopeError::RemoteUnavailable(_)
            | SentiscopeError::Timeout(_)
            | SentiscopeError::Network(_) => true,
            SentiscopeError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, SentiscopeError::RemoteUnavailable(_))
    }
}

impl From<reqwest::Error> for SentiscopeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SentiscopeError::Timeout(err.to_string())
        } else if err.is_connect() {
            SentiscopeError::RemoteUnavailable(err.to_string())
        } else if err.is_decode() {
            SentiscopeError::Network(format!("malformed response body: {}", err))
        } else {
            SentiscopeError::Network(err.to_string())
        }
    }
}

/// Result type alias for sentiscope operations
pub type Result<T> = std::result::Result<T, SentiscopeError>;
