//! Fuzz bytes to tensors.
//!
//! Layout of one tensor in the input, read sequentially from the cursor:
//!
//! ```text
//! [dtype selector: u8] [rank selector: u8] [dim: i64 LE] * rank [element bytes]
//! ```
//!
//! Every field is reduced into a valid range instead of being rejected, so
//! almost any byte sequence produces a usable tensor. Missing dimension bytes
//! default to the minimum dimension and missing element bytes are zero.

use crate::cursor::ByteCursor;
use crate::error::Error;
use crate::models::{DType, DecodeLimits, SUPPORTED_DTYPES, Tensor};
use crate::utils::checked_num_elements;

/// Maps a selector byte onto the supported dtype list.
pub fn parse_dtype(selector: u8) -> DType {
    let index = selector as usize % SUPPORTED_DTYPES.len();
    let dtype = SUPPORTED_DTYPES[index];
    tracing::trace!(selector, index, %dtype, "parsed dtype");
    dtype
}

/// Maps a selector byte into `[limits.min_rank, limits.max_rank]`.
pub fn parse_rank(selector: u8, limits: &DecodeLimits) -> u8 {
    let rank = (selector as u16 % limits.rank_span()) as u8 + limits.min_rank;
    tracing::trace!(selector, rank, "parsed rank");
    rank
}

/// Reads `rank` dimensions, each reduced into `[limits.min_dim, limits.max_dim]`.
///
/// When fewer than 8 bytes remain for a dimension it becomes `min_dim` and
/// the cursor jumps to the end of the input.
pub fn parse_shape(
    cursor: &mut ByteCursor<'_>,
    rank: u8,
    limits: &DecodeLimits,
) -> Result<Vec<i64>, Error> {
    if rank < limits.min_rank || rank > limits.max_rank {
        return Err(Error::InvalidRank {
            rank,
            min: limits.min_rank,
            max: limits.max_rank,
        });
    }
    if rank == 0 {
        return Ok(Vec::new());
    }

    let span = limits.dim_span();
    let mut shape = Vec::with_capacity(rank as usize);
    for _ in 0..rank {
        match cursor.read_i64() {
            Some(raw) => {
                let magnitude = raw.unsigned_abs();
                let dim = match span {
                    Some(span) => limits.min_dim.wrapping_add((magnitude % span) as i64),
                    None => i64::try_from(magnitude).unwrap_or(i64::MAX),
                };
                shape.push(dim);
            }
            None => {
                shape.push(limits.min_dim);
                cursor.skip_to_end();
            }
        }
    }

    tracing::trace!(?shape, offset = cursor.offset(), "parsed shape");
    Ok(shape)
}

/// Copies `element_count * dtype_size` bytes out of the cursor, zero-filling
/// whatever the input cannot supply.
///
/// The whole buffer is allocated up front, so its size is bounded only by the
/// shape; callers that take `DecodeLimits` from users must bound them first.
pub fn parse_tensor_data(
    cursor: &mut ByteCursor<'_>,
    element_count: i64,
    dtype_size: usize,
) -> Result<Vec<u8>, Error> {
    let overflow = Error::Overflow {
        elements: element_count,
        dtype_size,
    };
    let count = usize::try_from(element_count).map_err(|_| overflow.clone())?;
    let total = count.checked_mul(dtype_size).ok_or(overflow)?;

    let mut buffer = vec![0u8; total];
    let available = cursor.take_up_to(total);
    buffer[..available.len()].copy_from_slice(available);

    tracing::trace!(
        total,
        copied = available.len(),
        offset = cursor.offset(),
        "parsed tensor data"
    );
    Ok(buffer)
}

/// Decodes one tensor starting at the cursor's offset.
pub fn create_tensor(cursor: &mut ByteCursor<'_>, limits: &DecodeLimits) -> Result<Tensor, Error> {
    if cursor.remaining() < 2 {
        return Err(Error::InputTooSmall {
            offset: cursor.offset(),
            size: cursor.len(),
        });
    }

    let dtype = parse_dtype(cursor.u8_or(0));
    let rank = parse_rank(cursor.u8_or(0), limits);
    let shape = parse_shape(cursor, rank, limits)?;

    let element_count =
        checked_num_elements(&shape).ok_or_else(|| Error::InvalidShape { shape: shape.clone() })?;

    let data = if element_count == 0 {
        Vec::new()
    } else {
        parse_tensor_data(cursor, element_count, dtype.byte_size())?
    };

    Ok(Tensor::new(dtype, shape, data))
}

/// A set of limits bundled with the decoding functions.
///
/// # Examples
///
/// ```
/// use tensorfuzz::{ByteCursor, DType, Decoder};
///
/// let input = [0u8, 0u8];
/// let mut cursor = ByteCursor::new(&input);
/// let tensor = Decoder::default().tensor(&mut cursor)?;
/// assert_eq!(tensor.dtype, DType::F32);
/// assert!(tensor.shape.is_empty());
/// # Ok::<(), tensorfuzz::Error>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    pub limits: DecodeLimits,
}

impl Decoder {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    pub fn tensor(&self, cursor: &mut ByteCursor<'_>) -> Result<Tensor, Error> {
        create_tensor(cursor, &self.limits)
    }

    /// Decodes a tensor only if at least `min_remaining` bytes are left.
    pub fn tensor_if(
        &self,
        cursor: &mut ByteCursor<'_>,
        min_remaining: usize,
    ) -> Result<Option<Tensor>, Error> {
        if cursor.remaining() < min_remaining.max(2) {
            return Ok(None);
        }
        self.tensor(cursor).map(Some)
    }

    /// Decodes tensors until the input runs dry or `max` is reached.
    pub fn tensors(&self, cursor: &mut ByteCursor<'_>, max: usize) -> Result<Vec<Tensor>, Error> {
        let mut out = Vec::new();
        while out.len() < max && cursor.remaining() >= 2 {
            out.push(self.tensor(cursor)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dtype_wraps() {
        assert_eq!(parse_dtype(0), DType::F32);
        assert_eq!(parse_dtype(11), DType::Bool);
        assert_eq!(parse_dtype(12), DType::F32);
        assert_eq!(parse_dtype(255), SUPPORTED_DTYPES[255 % 12]);
    }

    #[test]
    fn test_parse_rank_bounds() {
        let limits = DecodeLimits::default();
        for selector in 0..=255u8 {
            let rank = parse_rank(selector, &limits);
            assert!(rank <= limits.max_rank);
        }
        let limits = DecodeLimits::default().with_rank(2, 3);
        assert_eq!(parse_rank(0, &limits), 2);
        assert_eq!(parse_rank(1, &limits), 3);
        assert_eq!(parse_rank(2, &limits), 2);
    }

    #[test]
    fn test_parse_shape_reduces_dims() {
        let limits = DecodeLimits::default();
        let mut data = Vec::new();
        data.extend_from_slice(&(-23i64).to_le_bytes());
        data.extend_from_slice(&i64::MIN.to_le_bytes());
        let mut cursor = ByteCursor::new(&data);
        let shape = parse_shape(&mut cursor, 2, &limits).unwrap();
        assert_eq!(shape[0], 23 % 11);
        assert_eq!(shape[1], ((i64::MIN.unsigned_abs()) % 11) as i64);
        assert_eq!(cursor.offset(), 16);
    }

    #[test]
    fn test_parse_shape_defaults_when_short() {
        let limits = DecodeLimits::default().with_dims(2, 5);
        let data = [7u8; 11];
        let mut cursor = ByteCursor::new(&data);
        let shape = parse_shape(&mut cursor, 3, &limits).unwrap();
        assert_eq!(shape, vec![2 + (0x0707_0707_0707_0707u64 % 4) as i64, 2, 2]);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_parse_shape_rejects_rank() {
        let limits = DecodeLimits::default();
        let mut cursor = ByteCursor::new(&[]);
        let err = parse_shape(&mut cursor, 9, &limits).unwrap_err();
        assert!(matches!(err, Error::InvalidRank { rank: 9, .. }));
    }

    #[test]
    fn test_parse_tensor_data_zero_fills() {
        let data = [1u8, 2, 3];
        let mut cursor = ByteCursor::new(&data);
        let bytes = parse_tensor_data(&mut cursor, 2, 4).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(cursor.offset(), 3);
    }

    #[test]
    fn test_parse_tensor_data_overflow() {
        let mut cursor = ByteCursor::new(&[]);
        assert!(matches!(
            parse_tensor_data(&mut cursor, i64::MAX, 16),
            Err(Error::Overflow { .. })
        ));
        assert!(matches!(
            parse_tensor_data(&mut cursor, -1, 1),
            Err(Error::Overflow { .. })
        ));
    }

    #[test]
    fn test_create_tensor_zero_elements() {
        // f64, rank 1, dim 0
        let mut data = vec![1u8, 1];
        data.extend_from_slice(&11i64.to_le_bytes());
        data.extend_from_slice(&[9u8; 4]);
        let mut cursor = ByteCursor::new(&data);
        let tensor = create_tensor(&mut cursor, &DecodeLimits::default()).unwrap();
        assert_eq!(tensor.dtype, DType::F64);
        assert_eq!(tensor.shape, vec![0]);
        assert!(tensor.data.is_empty());
        assert_eq!(cursor.remaining(), 4);
    }

    #[test]
    fn test_tensors_stops_when_dry() {
        let data = [0u8, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = ByteCursor::new(&data);
        let decoded = Decoder::default().tensors(&mut cursor, 8).unwrap();
        // each f32 scalar takes 2 header bytes + 4 data bytes
        assert_eq!(decoded.len(), 2);
        assert!(cursor.is_exhausted());
    }
}
