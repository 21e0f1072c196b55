//! Per-tensor affine quantization.

use super::tensor::Storage;
use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};
use crate::models::DType;

/// A quantized tensor: integer `values` plus the affine parameters that map
/// them back to reals as `(q - zero_point) * scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct QTensor {
    pub values: NdTensor,
    pub scale: f64,
    pub zero_point: i64,
}

fn qrange(dtype: DType) -> Option<(i64, i64)> {
    match dtype {
        DType::U8 => Some((u8::MIN as i64, u8::MAX as i64)),
        DType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
        DType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
        _ => None,
    }
}

impl NdRuntime {
    /// `q = clamp(round(x / scale) + zero_point)` into the range of `qdtype`,
    /// which must be one of u8, i8 or i32.
    pub fn quantize_per_tensor(
        &self,
        x: &NdTensor,
        scale: f64,
        zero_point: i64,
        qdtype: DType,
    ) -> Outcome<QTensor> {
        let op = "quantize_per_tensor";
        let (lo, hi) = qrange(qdtype).ok_or(OpError::unsupported(op, qdtype))?;
        let values = match x.storage() {
            Storage::Float(a) => a,
            _ => return Err(OpError::unsupported(op, x.dtype())),
        };
        if !scale.is_finite() || scale <= 0.0 {
            return Err(OpError::invalid(op, format!("scale must be finite and positive, got {scale}")));
        }
        if zero_point < lo || zero_point > hi {
            return Err(OpError::invalid(
                op,
                format!("zero_point {zero_point} is out of range [{lo}, {hi}] for {qdtype}"),
            ));
        }

        let inv_scale = 1.0 / scale;
        let quantized = values.mapv(|v| {
            let q = (v * inv_scale).round_ties_even() + zero_point as f64;
            // NaN maps to the zero point
            if q.is_nan() {
                zero_point
            } else {
                (q.clamp(lo as f64, hi as f64)) as i64
            }
        });
        Ok(QTensor {
            values: NdTensor::int(qdtype, quantized)?,
            scale,
            zero_point,
        })
    }

    /// Maps a quantized tensor back to f32.
    pub fn dequantize(&self, q: &QTensor) -> Outcome<NdTensor> {
        let values = match q.values.storage() {
            Storage::Int(a) => a,
            _ => return Err(OpError::unsupported("dequantize", q.values.dtype())),
        };
        let out = values.mapv(|v| (v - q.zero_point) as f64 * q.scale);
        NdTensor::float(DType::F32, out)
    }
}
