//! Common error type for the autonomy core.
//!
//! Every fallible operation in this crate returns `Result<T, CoreError>`
//! instead of asserting: a function that validates its inputs returns
//! `NullArg`/`InvalidArg` rather than panicking, unless an assertion was
//! explicitly requested at the call site through
//! [`crate::assert::AssertFramework`].

use thiserror::Error;

/// Error kinds surfaced to callers across the autonomy core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// General, otherwise-unclassified failure.
    #[error("generic error")]
    Generic,

    /// A required argument was absent (e.g. an empty description).
    #[error("null or missing argument")]
    NullArg,

    /// An argument failed validation (out of range, wrong length, ...).
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    /// An operation did not complete within its allotted time.
    #[error("operation timed out")]
    Timeout,

    /// The resource is currently busy (e.g. persistence backend mid-write).
    #[error("resource busy")]
    Busy,

    /// A bounded table or ring is at capacity.
    #[error("capacity exceeded")]
    OutOfMemory,

    /// The persistence backend reported an I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Data was truncated during a read or write.
    #[error("data truncated")]
    Truncated,

    /// A parameter was structurally invalid (distinct from a bad range).
    #[error("invalid parameter")]
    ParamInvalid,

    /// A persisted record failed CRC verification.
    #[error("CRC mismatch on persisted record")]
    CrcMismatch,

    /// The named region/entity was not found.
    #[error("not found")]
    NotFound,

    /// Operation rejected because the owner has not been initialized.
    #[error("not initialized")]
    NotInitialized,
}

/// Convenience alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;
