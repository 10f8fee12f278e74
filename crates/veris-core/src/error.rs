//! Error Types - Veris Core Error Handling
//!
//! Unified error type for the SDK. The kernel compiler treats every reachable
//! codegen failure as a programming error in the kernel being emitted, so the
//! compile variants carry the backend's diagnostic verbatim; numeric events
//! (overflow, NaN, wrap) are never errors and follow the element type's
//! native semantics.
//!
//! @version 0.1.0
//! @author Veris Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The main error type for Veris operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Input buffer is not contiguous.
    #[error("matrix requires contiguous data")]
    NotContiguous,

    /// Element bit width outside {1, 8, 16, 32, 64}.
    #[error("invalid element bit width: {bits}")]
    InvalidBitWidth {
        /// The offending width.
        bits: u16,
    },

    /// Unknown element type name or undecodable fingerprint.
    #[error("unknown element type: {0}")]
    UnknownType(String),

    /// Axis extents do not describe a usable element index space.
    #[error("invalid shape {channels}x{columns}x{rows}x{frames}")]
    InvalidShape {
        /// Channel extent.
        channels: i32,
        /// Column extent.
        columns: i32,
        /// Row extent.
        rows: i32,
        /// Frame extent.
        frames: i32,
    },

    /// No kernel registered under the given name.
    #[error("unknown kernel: {0}")]
    UnknownKernel(String),

    /// A pipeline descriptor could not be parsed.
    #[error("bad kernel descriptor: {0}")]
    BadKernelSpec(String),

    /// IR verification or native code generation failed.
    #[error("kernel compilation failed: {message}")]
    Compile {
        /// The backend's error string.
        message: String,
    },

    /// Host-side buffer allocation failed.
    #[error("allocation of {bytes} bytes failed")]
    Allocation {
        /// The requested size in bytes.
        bytes: usize,
    },

    /// Invalid argument to a utility function.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for Veris operations.
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// Helper Functions
// =============================================================================

impl Error {
    /// Creates a compilation error from any backend diagnostic.
    #[must_use]
    pub fn compile(message: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidBitWidth { bits: 24 };
        assert!(err.to_string().contains("24"));

        let err = Error::compile("verifier: bad instruction");
        assert!(err.to_string().contains("verifier"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::NotContiguous, Error::NotContiguous);
        assert_ne!(
            Error::UnknownType("q7".into()),
            Error::UnknownType("q9".into())
        );
    }
}
