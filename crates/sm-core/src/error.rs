//! # AppError
//!
//! Centralized error handling for the companion backend.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

/// The primary error type for all sm-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource missing *or* owned by someone else. The two cases are
    /// deliberately indistinguishable so callers cannot probe for the
    /// existence of other users' resources.
    #[error("{0} not found or access denied")]
    NotFound(String),

    /// Validation failure (e.g., empty message, malformed id)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing or invalid credentials / bearer token
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Infrastructure failure (e.g., DB down, commit failed)
    #[error("internal service error: {0}")]
    Internal(String),

    /// Resource already exists (e.g., duplicate email)
    #[error("conflict: {0}")]
    Conflict(String),
}

/// A specialized Result type for companion-backend logic.
pub type Result<T> = std::result::Result<T, AppError>;
