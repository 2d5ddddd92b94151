//! Error types for the segmentation step.
//!
//! This module defines the error types used throughout the crate, following
//! the non-exhaustive enum pattern so new failure modes can be added without
//! breaking callers.

use thiserror::Error;

/// The main error type for step operations.
///
/// Precondition violations raised by the UI layer are normally absorbed by
/// the controller as logged no-ops; the variant exists so collaborators and
/// helpers can still describe them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepError {
    /// The merge job resolved to `Failed`.
    #[error("Merge job failed: {0}")]
    JobFailed(String),

    /// The merge job resolved to `Cancelled`.
    #[error("Merge job cancelled")]
    JobCancelled,

    /// An operation was invoked in a state where it is not allowed.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// A reference required to build merge parameters is unset.
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// The external job runner rejected a request.
    #[error("Job runner error: {0}")]
    Runner(String),

    /// The scene could not create or resolve a node.
    #[error("Scene error: {0}")]
    Scene(String),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for step operations.
pub type Result<T> = std::result::Result<T, StepError>;
