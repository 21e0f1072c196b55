//! Error types for decoding fuzz inputs and for calls into the tensor runtime.

use thiserror::Error;

use crate::models::DType;

/// Errors raised while turning fuzz bytes into tensors.
///
/// These are rare on purpose: the decoder maps almost every byte pattern to
/// a usable value, so an `Error` reaching the driver marks the input as a
/// reproducer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fewer than two bytes left for the dtype and rank selectors.
    #[error("Input data too small for tensor metadata (dtype, rank). Offset: {offset}, Size: {size}")]
    InputTooSmall { offset: usize, size: usize },

    /// Requested rank is outside the configured bounds.
    #[error("Invalid rank {rank}, expected {min}..={max}")]
    InvalidRank { rank: u8, min: u8, max: u8 },

    /// Shape has a negative dimension or its element count overflows `i64`.
    #[error("Parsed shape {shape:?} is invalid (negative dimension or overflow)")]
    InvalidShape { shape: Vec<i64> },

    /// `element_count * dtype_size` does not fit in `usize`.
    #[error("{elements} elements of {dtype_size} bytes overflow the addressable size")]
    Overflow { elements: i64, dtype_size: usize },
}

/// Categories of errors the tensor runtime raises for invalid arguments.
///
/// These play the role of the library's own exception type: the input was
/// decodable but semantically rejected, which is a normal fuzzing outcome.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LibraryError {
    #[error("{op}: shape mismatch between {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    #[error("{op}: unsupported dtype {dtype}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    #[error("{op}: dimension {dim} out of range for a tensor of rank {ndim}")]
    DimOutOfRange {
        op: &'static str,
        dim: i64,
        ndim: usize,
    },

    #[error("{op}: matrix is singular")]
    Singular { op: &'static str },

    #[error("{op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),
}

/// Failure of a runtime call, tagged by whether the fuzzing engine should
/// care about it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OpError {
    /// The runtime rejected its arguments. The input is kept.
    #[error(transparent)]
    Expected(#[from] LibraryError),

    /// Anything else: binding bugs and decoder failures. The input is
    /// reported as a reproducer.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

impl OpError {
    pub fn is_expected(&self) -> bool {
        matches!(self, OpError::Expected(_))
    }

    pub(crate) fn invalid(op: &'static str, reason: impl Into<String>) -> Self {
        OpError::Expected(LibraryError::InvalidArgument {
            op,
            reason: reason.into(),
        })
    }

    pub(crate) fn unsupported(op: &'static str, dtype: DType) -> Self {
        OpError::Expected(LibraryError::UnsupportedDType { op, dtype })
    }

    pub(crate) fn shape_mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Self {
        OpError::Expected(LibraryError::ShapeMismatch {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        })
    }
}

impl From<Error> for OpError {
    fn from(err: Error) -> Self {
        OpError::Unexpected(err.to_string())
    }
}

impl From<ndarray::ShapeError> for OpError {
    fn from(err: ndarray::ShapeError) -> Self {
        OpError::Unexpected(format!("ndarray shape error: {err}"))
    }
}

/// Result of a runtime call.
pub type Outcome<T> = Result<T, OpError>;
