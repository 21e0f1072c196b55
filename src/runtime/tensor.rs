use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn, Zip};
use num_complex::Complex64;

use crate::error::{OpError, Outcome};
use crate::models::{DType, Tensor};

/// Element storage, one variant per dtype family.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// f16, bf16, f32 and f64. Values are always representable in the dtype.
    Float(ArrayD<f64>),
    /// i8, u8, i16, i32 and i64. Values are always within the dtype's range.
    Int(ArrayD<i64>),
    Bool(ArrayD<bool>),
    /// c64 and c128.
    Complex(ArrayD<Complex64>),
}

/// Applies the same expression to whichever array a `Storage` holds.
macro_rules! map_storage {
    ($storage:expr, $arr:ident => $body:expr) => {
        match $storage {
            Storage::Float($arr) => Storage::Float($body),
            Storage::Int($arr) => Storage::Int($body),
            Storage::Bool($arr) => Storage::Bool($body),
            Storage::Complex($arr) => Storage::Complex($body),
        }
    };
}
pub(crate) use map_storage;

/// A runtime tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct NdTensor {
    dtype: DType,
    storage: Storage,
}

impl NdTensor {
    /// Builds a tensor, rounding or wrapping values into `dtype`.
    pub fn new(dtype: DType, storage: Storage) -> Outcome<Self> {
        let storage = match (storage, dtype) {
            (Storage::Float(a), d) if d.is_float() => Storage::Float(a.mapv(|v| round_float(d, v))),
            (Storage::Int(a), d) if d.is_int() => Storage::Int(a.mapv(|v| wrap_int(d, v))),
            (Storage::Bool(a), DType::Bool) => Storage::Bool(a),
            (Storage::Complex(a), DType::C64) => Storage::Complex(a.mapv(round_c64)),
            (Storage::Complex(a), DType::C128) => Storage::Complex(a),
            (_, d) => {
                return Err(OpError::Unexpected(format!(
                    "storage variant does not match dtype {d}"
                )));
            }
        };
        Ok(Self { dtype, storage })
    }

    pub fn float(dtype: DType, array: ArrayD<f64>) -> Outcome<Self> {
        Self::new(dtype, Storage::Float(array))
    }

    pub fn int(dtype: DType, array: ArrayD<i64>) -> Outcome<Self> {
        Self::new(dtype, Storage::Int(array))
    }

    pub fn bool(array: ArrayD<bool>) -> Self {
        Self {
            dtype: DType::Bool,
            storage: Storage::Bool(array),
        }
    }

    pub fn complex(dtype: DType, array: ArrayD<Complex64>) -> Outcome<Self> {
        Self::new(dtype, Storage::Complex(array))
    }

    /// Float tensor from a flat vector; mostly for tests and harness setup.
    pub fn from_vec(dtype: DType, shape: &[usize], values: Vec<f64>) -> Outcome<Self> {
        Self::float(dtype, ArrayD::from_shape_vec(IxDyn(shape), values)?)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    pub fn into_storage(self) -> Storage {
        self.storage
    }

    pub fn shape(&self) -> &[usize] {
        match &self.storage {
            Storage::Float(a) => a.shape(),
            Storage::Int(a) => a.shape(),
            Storage::Bool(a) => a.shape(),
            Storage::Complex(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_floating_point(&self) -> bool {
        self.dtype.is_float()
    }

    /// Converts a decoded payload. Element bytes are little-endian.
    pub fn from_payload(tensor: &Tensor) -> Outcome<Self> {
        if !tensor.is_consistent() {
            return Err(OpError::Unexpected(format!(
                "payload of {} bytes does not match shape {:?} of {}",
                tensor.data.len(),
                tensor.shape,
                tensor.dtype
            )));
        }
        let dims: Vec<usize> = tensor.shape.iter().map(|&d| d as usize).collect();
        let dim = IxDyn(&dims);
        let size = tensor.dtype.byte_size();
        let chunks = tensor.data.chunks_exact(size);

        let storage = match tensor.dtype {
            DType::F32 => Storage::Float(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| f32::from_le_bytes(le(c)) as f64).collect(),
            )?),
            DType::F64 => Storage::Float(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| f64::from_le_bytes(le(c))).collect(),
            )?),
            DType::F16 => Storage::Float(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| f16::from_le_bytes(le(c)).to_f64()).collect(),
            )?),
            DType::BF16 => Storage::Float(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| bf16::from_le_bytes(le(c)).to_f64()).collect(),
            )?),
            DType::C64 => Storage::Complex(ArrayD::from_shape_vec(
                dim,
                chunks
                    .map(|c| {
                        Complex64::new(
                            f32::from_le_bytes(le(&c[..4])) as f64,
                            f32::from_le_bytes(le(&c[4..])) as f64,
                        )
                    })
                    .collect(),
            )?),
            DType::C128 => Storage::Complex(ArrayD::from_shape_vec(
                dim,
                chunks
                    .map(|c| Complex64::new(f64::from_le_bytes(le(&c[..8])), f64::from_le_bytes(le(&c[8..]))))
                    .collect(),
            )?),
            DType::I8 => Storage::Int(ArrayD::from_shape_vec(dim, chunks.map(|c| c[0] as i8 as i64).collect())?),
            DType::U8 => Storage::Int(ArrayD::from_shape_vec(dim, chunks.map(|c| c[0] as i64).collect())?),
            DType::I16 => Storage::Int(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| i16::from_le_bytes(le(c)) as i64).collect(),
            )?),
            DType::I32 => Storage::Int(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| i32::from_le_bytes(le(c)) as i64).collect(),
            )?),
            DType::I64 => Storage::Int(ArrayD::from_shape_vec(
                dim,
                chunks.map(|c| i64::from_le_bytes(le(c))).collect(),
            )?),
            DType::Bool => Storage::Bool(ArrayD::from_shape_vec(dim, chunks.map(|c| c[0] != 0).collect())?),
        };

        Ok(Self {
            dtype: tensor.dtype,
            storage,
        })
    }

    /// Converts back into a little-endian payload.
    pub fn to_payload(&self) -> Tensor {
        let mut data = Vec::with_capacity(self.numel() * self.dtype.byte_size());
        match &self.storage {
            Storage::Float(a) => {
                for &v in a.iter() {
                    match self.dtype {
                        DType::F64 => data.extend_from_slice(&v.to_le_bytes()),
                        DType::F16 => data.extend_from_slice(&f16::from_f64(v).to_le_bytes()),
                        DType::BF16 => data.extend_from_slice(&bf16::from_f64(v).to_le_bytes()),
                        _ => data.extend_from_slice(&(v as f32).to_le_bytes()),
                    }
                }
            }
            Storage::Int(a) => {
                let width = self.dtype.byte_size();
                for &v in a.iter() {
                    data.extend_from_slice(&v.to_le_bytes()[..width]);
                }
            }
            Storage::Bool(a) => data.extend(a.iter().map(|&b| b as u8)),
            Storage::Complex(a) => {
                for v in a.iter() {
                    if self.dtype == DType::C64 {
                        data.extend_from_slice(&(v.re as f32).to_le_bytes());
                        data.extend_from_slice(&(v.im as f32).to_le_bytes());
                    } else {
                        data.extend_from_slice(&v.re.to_le_bytes());
                        data.extend_from_slice(&v.im.to_le_bytes());
                    }
                }
            }
        }
        Tensor::new(
            self.dtype,
            self.shape().iter().map(|&d| d as i64).collect(),
            data,
        )
    }

    /// Casts to `dtype`. Complex to real keeps the real part; float to int
    /// truncates toward zero and saturates; int to narrower int wraps.
    pub fn to_dtype(&self, dtype: DType) -> Outcome<Self> {
        if dtype == self.dtype {
            return Ok(self.clone());
        }
        let storage = match (&self.storage, dtype) {
            (s, DType::Bool) => Storage::Bool(match s {
                Storage::Float(a) => a.mapv(|v| v != 0.0),
                Storage::Int(a) => a.mapv(|v| v != 0),
                Storage::Bool(a) => a.clone(),
                Storage::Complex(a) => a.mapv(|v| v.re != 0.0 || v.im != 0.0),
            }),
            (s, d) if d.is_complex() => Storage::Complex(match s {
                Storage::Complex(a) => a.clone(),
                other => real_values(other).mapv(|v| Complex64::new(v, 0.0)),
            }),
            (s, d) if d.is_float() => Storage::Float(real_values(s)),
            (s, _) => Storage::Int(match s {
                Storage::Int(a) => a.clone(),
                Storage::Bool(a) => a.mapv(|v| v as i64),
                Storage::Float(a) => a.mapv(|v| v as i64),
                Storage::Complex(a) => a.mapv(|v| v.re as i64),
            }),
        };
        Self::new(dtype, storage)
    }

    /// Real values as `f64`; complex tensors are rejected for `op`.
    pub fn real_array(&self, op: &'static str) -> Outcome<ArrayD<f64>> {
        match &self.storage {
            Storage::Complex(_) => Err(OpError::unsupported(op, self.dtype)),
            other => Ok(real_values(other)),
        }
    }

    /// The float array if this is a real floating-point tensor.
    pub fn float_array(&self, op: &'static str) -> Outcome<&ArrayD<f64>> {
        match &self.storage {
            Storage::Float(a) => Ok(a),
            _ => Err(OpError::unsupported(op, self.dtype)),
        }
    }

    /// Largest absolute elementwise difference, treating matching NaNs as
    /// equal. `None` when shapes differ.
    pub fn max_abs_diff(&self, other: &NdTensor) -> Option<f64> {
        if self.shape() != other.shape() {
            return None;
        }
        let a = complex_values(&self.storage);
        let b = complex_values(&other.storage);
        let mut worst: f64 = 0.0;
        Zip::from(&a).and(&b).for_each(|x, y| {
            let diff = if x.is_nan() && y.is_nan() {
                0.0
            } else if x == y {
                0.0
            } else {
                (x - y).norm()
            };
            worst = if diff.is_nan() { f64::INFINITY } else { worst.max(diff) };
        });
        Some(worst)
    }

    /// `|a - b| <= atol + rtol * |b|` everywhere, shapes equal, NaNs equal.
    pub fn allclose(&self, other: &NdTensor, rtol: f64, atol: f64) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        let a = complex_values(&self.storage);
        let b = complex_values(&other.storage);
        Zip::from(&a).and(&b).all(|x, y| {
            if x.is_nan() || y.is_nan() {
                return x.is_nan() && y.is_nan();
            }
            if x == y {
                return true;
            }
            (x - y).norm() <= atol + rtol * y.norm()
        })
    }
}

fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

pub(crate) fn round_float(dtype: DType, v: f64) -> f64 {
    match dtype {
        DType::F32 => v as f32 as f64,
        DType::F16 => f16::from_f64(v).to_f64(),
        DType::BF16 => bf16::from_f64(v).to_f64(),
        _ => v,
    }
}

pub(crate) fn wrap_int(dtype: DType, v: i64) -> i64 {
    match dtype {
        DType::I8 => v as i8 as i64,
        DType::U8 => v as u8 as i64,
        DType::I16 => v as i16 as i64,
        DType::I32 => v as i32 as i64,
        _ => v,
    }
}

pub(crate) fn round_c64(v: Complex64) -> Complex64 {
    Complex64::new(v.re as f32 as f64, v.im as f32 as f64)
}

/// Real values of any storage; complex keeps the real part.
pub(crate) fn real_values(storage: &Storage) -> ArrayD<f64> {
    match storage {
        Storage::Float(a) => a.clone(),
        Storage::Int(a) => a.mapv(|v| v as f64),
        Storage::Bool(a) => a.mapv(|v| if v { 1.0 } else { 0.0 }),
        Storage::Complex(a) => a.mapv(|v| v.re),
    }
}

pub(crate) fn int_values(storage: &Storage) -> ArrayD<i64> {
    match storage {
        Storage::Int(a) => a.clone(),
        Storage::Bool(a) => a.mapv(|v| v as i64),
        Storage::Float(a) => a.mapv(|v| v as i64),
        Storage::Complex(a) => a.mapv(|v| v.re as i64),
    }
}

pub(crate) fn complex_values(storage: &Storage) -> ArrayD<Complex64> {
    match storage {
        Storage::Complex(a) => a.clone(),
        other => real_values(other).mapv(|v| Complex64::new(v, 0.0)),
    }
}

/// Broadcast result shape of `a` and `b`, NumPy rules.
pub(crate) fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];
    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}
