//! Error types for ShelfSync
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by domain (download subsystem, API, transfer, storage, etc.)
//! for better error handling and reporting.
//!
//! ## Caller-facing download errors
//!
//! The download orchestrator rejects requests before doing any work when one of
//! its preconditions does not hold:
//! - `UnsupportedItemType` - the identifier does not name an audiobook or episode
//! - `Existing` - the item is already persisted
//! - `Blocked` - a block reference is held on the item
//! - `Busy` - another enqueue/remove is in flight for the item
//! - `Missing` - a podcast removal was requested for a podcast that is not persisted
//!
//! Transfer failures never reach callers directly: they are absorbed into the
//! per-asset retry counter and eventually into a cascading removal.

use thiserror::Error;

/// Result type alias using our ShelfError type
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Main error type for ShelfSync
#[derive(Error, Debug)]
pub enum ShelfError {
    // ===== Download Subsystem Errors =====

    /// Only audiobooks and episodes can be downloaded or removed as playable items
    #[error("Unsupported item type: {0}")]
    UnsupportedItemType(String),

    /// Item is already persisted
    #[error("Item already downloaded: {0}")]
    Existing(String),

    /// Item has at least one block reference
    #[error("Item is blocked: {0}")]
    Blocked(String),

    /// Another enqueue/remove operation is in flight for the item
    #[error("Item is busy: {0}")]
    Busy(String),

    /// Item is not persisted
    #[error("Item is not downloaded: {0}")]
    Missing(String),

    // ===== API Errors =====

    /// Generic API request failure
    #[error("API request failed: {message}")]
    ApiRequestFailed {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
        /// API endpoint that failed
        endpoint: Option<String>,
    },

    /// API returned invalid or unexpected response format
    #[error("Invalid API response: {message}")]
    InvalidApiResponse {
        message: String,
        response_body: Option<String>,
    },

    /// Server rejected the bearer token and no refresh was possible
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error is transient and retry might succeed
        is_transient: bool,
    },

    /// No API client is registered for a connection
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    // ===== Transfer Errors =====

    /// Background transfer failed
    #[error("Transfer {task_id} failed: {reason}")]
    TransferFailed { task_id: i64, reason: String },

    /// Transfer task is not known to the backend
    #[error("Unknown transfer task: {0}")]
    UnknownTask(i64),

    // ===== File/Storage Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// File I/O operation failed
    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Database Errors =====

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Database migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Stored row could not be decoded into a model
    #[error("Corrupt record in {table}: {message}")]
    CorruptRecord { table: String, message: String },

    // ===== Configuration/State Errors =====

    /// Item identifier could not be parsed
    #[error("Invalid item identifier: {0}")]
    InvalidIdentifier(String),

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Invalid input parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid application state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ===== General Errors =====

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation was superseded or cancelled
    #[error("Operation cancelled")]
    Cancelled,

    // ===== External Library Errors =====

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl ShelfError {
    /// Create a NotFound error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        ShelfError::NotFound(resource.into())
    }

    /// Create an InvalidInput error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        ShelfError::InvalidInput(message.into())
    }

    /// Create an API request failed error
    pub fn api_failed<S: Into<String>>(
        message: S,
        status_code: Option<u16>,
        endpoint: Option<String>,
    ) -> Self {
        ShelfError::ApiRequestFailed {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create a network error
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        ShelfError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a corrupt record error
    pub fn corrupt<T: Into<String>, S: Into<String>>(table: T, message: S) -> Self {
        ShelfError::CorruptRecord {
            table: table.into(),
            message: message.into(),
        }
    }

    /// True for the errors the orchestrator raises before doing any work
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            ShelfError::UnsupportedItemType(_)
                | ShelfError::Existing(_)
                | ShelfError::Blocked(_)
                | ShelfError::Busy(_)
                | ShelfError::Missing(_)
        )
    }

    /// Check if error is retryable
    ///
    /// Returns true for transient network errors and server-side failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShelfError::NetworkError { is_transient, .. } => *is_transient,
            ShelfError::ApiRequestFailed {
                status_code: Some(code),
                ..
            } => *code >= 500,
            ShelfError::HttpError(e) => e.is_timeout() || e.is_connect(),
            ShelfError::Busy(_) => true,
            _ => false,
        }
    }

    /// Check if error is authentication-related
    pub fn is_auth_error(&self) -> bool {
        match self {
            ShelfError::Unauthorized(_) => true,
            ShelfError::ApiRequestFailed {
                status_code: Some(code),
                ..
            } => *code == 401 || *code == 403,
            _ => false,
        }
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            ShelfError::UnsupportedItemType(kind) => {
                format!("Items of type '{}' cannot be downloaded.", kind)
            }
            ShelfError::Existing(_) => "This item is already downloaded.".to_string(),
            ShelfError::Blocked(_) => {
                "This item is in use and cannot be changed right now.".to_string()
            }
            ShelfError::Busy(_) => {
                "This item is already being updated. Please try again in a moment.".to_string()
            }
            ShelfError::Missing(_) => "This item is not downloaded.".to_string(),
            ShelfError::Unauthorized(_) => {
                "Your session has expired. Please sign in to the server again.".to_string()
            }
            ShelfError::UnknownConnection(id) => {
                format!("No server connection named '{}' is configured.", id)
            }
            ShelfError::NetworkError { .. } => {
                "The server could not be reached. Please check your connection.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
