//! Error taxonomy for the incremental delivery engine.
//!
//! Field-level and stream-abnormal-end errors are ordinary [`GraphqlError`]
//! values threaded through the public API. Invariant violations use the
//! `internal_error!`/`bail!`/`ensure!` macro family below: in debug builds
//! they panic immediately (so test failures point at the real bug), and in
//! release builds they unwind into a `GraphqlError::Internal` instead of
//! taking the process down.

use std::fmt;

use serde::Serialize;

use crate::path::PathElement;

/// Create an internal error.
///
/// # Example
/// ```ignore
/// use incremental_delivery::internal_error;
/// use incremental_delivery::error::GraphqlError;
///
/// let result: Result<(), GraphqlError> = Err(internal_error!("expected {} to be Some", "x"));
/// ```
#[macro_export]
macro_rules! internal_error {
    ( $( $arg:tt )+ ) => {
        $crate::error::GraphqlError::internal(format!( $( $arg )+ ))
    }
}

/// Break out of the current function, returning an internal error.
#[macro_export]
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::internal_error!( $( $arg )+ ))
    }
}

/// A safe assertion: in debug mode it panics on failure, in release it
/// returns an internal error. Use only for conditions that should never
/// happen during normal operation.
#[macro_export]
macro_rules! ensure {
    ( $expr:expr, $( $arg:tt )+ ) => {
        #[cfg(debug_assertions)]
        {
            if false {
                return Err($crate::internal_error!("ensure!() must be used in a function that returns a Result"));
            }
            assert!($expr, $( $arg )+);
        }
        #[cfg(not(debug_assertions))]
        if !$expr {
            $crate::bail!( $( $arg )+ );
        }
    }
}

/// A GraphQL-shaped error, serialised the same way whether it originated in
/// the executor (a field-level error) or inside this crate (an internal
/// invariant violation).
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path: Vec<PathElement>,
    #[serde(skip)]
    pub(crate) kind: ErrorKind,
}

#[derive(Debug, Clone, Default)]
pub(crate) enum ErrorKind {
    #[default]
    Field,
    Internal,
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl GraphqlError {
    /// Construct a field-level error at the given response path.
    pub fn at_path(message: impl Into<String>, path: Vec<PathElement>) -> Self {
        Self {
            message: message.into(),
            path,
            kind: ErrorKind::Field,
        }
    }

    /// Construct a field-level error with no attached path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            kind: ErrorKind::Field,
        }
    }

    /// Construct an internal (programmer-error) `GraphqlError`. Prefer the
    /// `internal_error!`/`bail!`/`ensure!` macros over calling this directly.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            kind: ErrorKind::Internal,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, ErrorKind::Internal)
    }
}
