//! Error Types for the Bridge
//!
//! ## Error Categories
//!
//! - Callback registration failures (`InvalidCallback`)
//! - Host → native conversion failures (`TypeMismatch`, `NumericOverflow`)
//! - Native operations that returned an error to a bound call (`NativeFault`)
//! - Exceptions raised by host code (`HostException`)
//! - Faults contained at the callback boundary (`ContainedCallbackFault`)
//!
//! Registration and conversion errors are synchronous and returned at the
//! call site. Contained faults are never returned from an invocation; they
//! only travel through a [`FaultSink`](crate::host::FaultSink).

use std::fmt;

use smol_str::SmolStr;
use thiserror::Error;

use crate::value::HostException;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The value supplied as a callback is not invocable
    #[error("callback argument must be callable, got {actual}")]
    InvalidCallback {
        /// Host type name of the rejected value
        actual: SmolStr,
    },

    /// A host value did not convert to the required native type
    #[error("type mismatch: expected {expected}, got {actual}{}", ElementIndex(.index))]
    TypeMismatch {
        /// Native type that was requested
        expected: SmolStr,
        /// Host type that was found
        actual: SmolStr,
        /// Position of the offending element, for sequence conversions
        index: Option<usize>,
    },

    /// Numeric overflow during conversion
    #[error("numeric overflow: {value} cannot be represented as {target_type}")]
    NumericOverflow {
        /// String representation of the value
        value: String,
        /// Target type name
        target_type: SmolStr,
    },

    /// A bound native operation reported an error
    #[error("native operation '{operation}' failed: {message}")]
    NativeFault {
        /// Name the operation was bound under
        operation: SmolStr,
        /// Rendered native error
        message: String,
    },

    /// Host code raised an exception
    #[error("{0}")]
    HostException(HostException),

    /// A host callable raised while invoked from native code
    #[error("exception in callback '{callback}': {message}")]
    ContainedCallbackFault {
        /// Name of the callback that raised
        callback: SmolStr,
        /// Rendered exception
        message: String,
    },
}

struct ElementIndex<'a>(&'a Option<usize>);

impl fmt::Display for ElementIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(index) => write!(f, " at index {}", index),
            None => Ok(()),
        }
    }
}

impl BridgeError {
    /// Create an invalid callback error
    pub fn invalid_callback(actual: impl Into<SmolStr>) -> Self {
        BridgeError::InvalidCallback {
            actual: actual.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<SmolStr>, actual: impl Into<SmolStr>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
            index: None,
        }
    }

    /// Create a numeric overflow error
    pub fn numeric_overflow(value: impl Into<String>, target_type: impl Into<SmolStr>) -> Self {
        BridgeError::NumericOverflow {
            value: value.into(),
            target_type: target_type.into(),
        }
    }

    /// Create a native fault error
    pub fn native_fault(operation: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        BridgeError::NativeFault {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a contained callback fault
    pub fn contained(callback: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        BridgeError::ContainedCallbackFault {
            callback: callback.into(),
            message: message.into(),
        }
    }

    /// Attach the position of the failing element to a conversion error.
    ///
    /// Errors that already carry an index keep the innermost one.
    pub fn at_index(self, position: usize) -> Self {
        match self {
            BridgeError::TypeMismatch {
                expected,
                actual,
                index: None,
            } => BridgeError::TypeMismatch {
                expected,
                actual,
                index: Some(position),
            },
            other => other,
        }
    }

    /// Check if this is a conversion error
    pub fn is_type_error(&self) -> bool {
        matches!(
            self,
            BridgeError::TypeMismatch { .. } | BridgeError::NumericOverflow { .. }
        )
    }

    /// Check if this is a callback registration error
    pub fn is_invalid_callback(&self) -> bool {
        matches!(self, BridgeError::InvalidCallback { .. })
    }

    /// Check if this is a host exception
    pub fn is_host_exception(&self) -> bool {
        matches!(self, BridgeError::HostException(_))
    }
}

impl From<HostException> for BridgeError {
    fn from(exception: HostException) -> Self {
        BridgeError::HostException(exception)
    }
}
