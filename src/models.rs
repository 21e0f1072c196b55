use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_RANK: u8 = 0;
pub const MAX_RANK: u8 = 4;
pub const MIN_DIM: i64 = 0;
pub const MAX_DIM: i64 = 10;

/// Element types the decoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    F16,
    BF16,
    C64,
    C128,
    I8,
    U8,
    I16,
    I32,
    I64,
    Bool,
}

/// Selector order used by [`crate::decoder::parse_dtype`].
pub const SUPPORTED_DTYPES: [DType; 12] = [
    DType::F32,
    DType::F64,
    DType::F16,
    DType::BF16,
    DType::C64,
    DType::C128,
    DType::I8,
    DType::U8,
    DType::I16,
    DType::I32,
    DType::I64,
    DType::Bool,
];

impl DType {
    pub fn byte_size(&self) -> usize {
        match self {
            DType::C128 => 16,
            DType::F64 | DType::I64 | DType::C64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 | DType::I16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64 | DType::F16 | DType::BF16)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DType::C64 | DType::C128)
    }

    pub fn is_int(&self) -> bool {
        matches!(
            self,
            DType::I8 | DType::U8 | DType::I16 | DType::I32 | DType::I64
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::C64 => "complex64",
            DType::C128 => "complex128",
            DType::I8 => "int8",
            DType::U8 => "uint8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds the decoder reduces ranks and dimensions into.
///
/// # Examples
///
/// ```
/// use tensorfuzz::DecodeLimits;
///
/// let limits = DecodeLimits::default().with_rank(1, 2).with_dims(1, 3);
/// assert_eq!(limits.max_rank, 2);
/// assert_eq!(limits.min_dim, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub min_rank: u8,
    pub max_rank: u8,
    pub min_dim: i64,
    pub max_dim: i64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            min_rank: MIN_RANK,
            max_rank: MAX_RANK,
            min_dim: MIN_DIM,
            max_dim: MAX_DIM,
        }
    }
}

impl DecodeLimits {
    pub fn with_rank(mut self, min: u8, max: u8) -> Self {
        self.min_rank = min;
        self.max_rank = max;
        self
    }

    pub fn with_dims(mut self, min: i64, max: i64) -> Self {
        self.min_dim = min;
        self.max_dim = max;
        self
    }

    /// Number of distinct ranks, at least 1.
    pub(crate) fn rank_span(&self) -> u16 {
        (self.max_rank.saturating_sub(self.min_rank) as u16) + 1
    }

    /// Number of distinct dimension values, `None` if it exceeds `u64`.
    pub(crate) fn dim_span(&self) -> Option<u64> {
        let width = (self.max_dim as i128) - (self.min_dim as i128) + 1;
        if width <= 0 {
            Some(1)
        } else {
            u64::try_from(width).ok()
        }
    }
}

/// A decoded tensor: dtype, shape and little-endian element bytes.
///
/// Owns its storage; nothing aliases the fuzz input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Vec<i64>,
    pub data: Vec<u8>,
}

impl Tensor {
    pub fn new(dtype: DType, shape: Vec<i64>, data: Vec<u8>) -> Self {
        Self { dtype, shape, data }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element count; 1 for scalars.
    pub fn num_elements(&self) -> u64 {
        self.shape
            .iter()
            .fold(1u64, |acc, &d| acc.saturating_mul(d.max(0) as u64))
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Whether `data` holds exactly `num_elements * dtype size` bytes.
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().all(|&d| d >= 0)
            && (self.num_elements() as u128) * (self.dtype.byte_size() as u128)
                == self.data.len() as u128
    }
}
