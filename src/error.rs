//! Error types for preference integrity operations
//!
//! The check/enforce core of this library is infallible by design: a tampered
//! value is an expected outcome (a [`ValueState`](crate::ValueState)), not an
//! error. Errors only arise at the boundaries - loading a tracking
//! configuration, reading or writing a preference file, decoding a seed.

/// Errors that can occur at the boundaries of the preference integrity layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The secret seed was not valid hex
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// A preference file's root value was not a JSON object
    #[error("Preference file root must be a JSON object")]
    RootNotObject,

    /// The same path was registered twice in a tracking configuration
    #[error("Tracked path '{0}' is registered more than once")]
    DuplicateTrackedPath(String),

    /// The same reporting id was assigned to two different paths
    #[error("Reporting id {0} is assigned to more than one tracked path")]
    DuplicateReportingId(u32),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
