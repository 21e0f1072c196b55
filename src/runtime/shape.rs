//! View-style shape operators. All of them copy; there is no aliasing.

use ndarray::{Axis, IxDyn};

use super::elementwise::promote;
use super::tensor::{map_storage, Storage};
use super::{wrap_dim, NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};

impl NdRuntime {
    /// Reshapes `x`; at most one entry of `shape` may be `-1`.
    pub fn reshape(&self, x: &NdTensor, shape: &[i64]) -> Outcome<NdTensor> {
        let numel = x.numel();
        let mut inferred = None;
        let mut known: usize = 1;
        for (i, &d) in shape.iter().enumerate() {
            match d {
                -1 if inferred.is_some() => {
                    return Err(OpError::invalid("reshape", "only one dimension can be inferred"));
                }
                -1 => inferred = Some(i),
                d if d < 0 => {
                    return Err(OpError::invalid("reshape", format!("invalid shape dimension {d}")));
                }
                d => {
                    known = known
                        .checked_mul(d as usize)
                        .ok_or_else(|| OpError::invalid("reshape", "shape is too large"))?;
                }
            }
        }

        let mut dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        if let Some(i) = inferred {
            if known == 0 || numel % known != 0 {
                return Err(OpError::invalid(
                    "reshape",
                    format!("shape {shape:?} is invalid for input of size {numel}"),
                ));
            }
            dims[i] = numel / known;
        } else if known != numel {
            return Err(OpError::invalid(
                "reshape",
                format!("shape {shape:?} is invalid for input of size {numel}"),
            ));
        }

        let storage = map_storage!(x.storage(), a => {
            let flat: Vec<_> = a.iter().cloned().collect();
            ndarray::ArrayD::from_shape_vec(IxDyn(&dims), flat)?
        });
        NdTensor::new(x.dtype(), storage)
    }

    /// Flattens `x` into one dimension; a scalar becomes `[1]`.
    pub fn flatten(&self, x: &NdTensor) -> Outcome<NdTensor> {
        self.reshape(x, &[-1])
    }

    pub fn transpose(&self, x: &NdTensor, dim0: i64, dim1: i64) -> Outcome<NdTensor> {
        let a = wrap_dim("transpose", dim0, x.ndim())?;
        let b = wrap_dim("transpose", dim1, x.ndim())?;
        if x.ndim() == 0 {
            return Ok(x.clone());
        }
        let storage = map_storage!(x.storage(), arr => {
            let mut view = arr.view();
            view.swap_axes(a, b);
            view.as_standard_layout().into_owned()
        });
        NdTensor::new(x.dtype(), storage)
    }

    /// Drops size-1 dimensions: all of them, or only `dim` when given.
    pub fn squeeze(&self, x: &NdTensor, dim: Option<i64>) -> Outcome<NdTensor> {
        let shape = x.shape();
        let dims: Vec<i64> = match dim {
            Some(d) => {
                let d = wrap_dim("squeeze", d, x.ndim())?;
                shape
                    .iter()
                    .enumerate()
                    .filter(|&(i, &s)| !(i == d && s == 1))
                    .map(|(_, &s)| s as i64)
                    .collect()
            }
            None => shape.iter().filter(|&&s| s != 1).map(|&s| s as i64).collect(),
        };
        self.reshape(x, &dims)
    }

    /// Inserts a size-1 dimension at `dim`, which may range over `ndim + 1`
    /// positions.
    pub fn unsqueeze(&self, x: &NdTensor, dim: i64) -> Outcome<NdTensor> {
        let d = wrap_dim("unsqueeze", dim, x.ndim() + 1)?;
        let storage = map_storage!(x.storage(), arr => arr.clone().insert_axis(Axis(d)));
        NdTensor::new(x.dtype(), storage)
    }

    /// Concatenates along `dim`. Inputs are promoted to a common dtype and
    /// must agree on every other dimension.
    pub fn cat(&self, tensors: &[NdTensor], dim: i64) -> Outcome<NdTensor> {
        let first = tensors
            .first()
            .ok_or_else(|| OpError::invalid("cat", "expected a non-empty list of tensors"))?;
        if tensors.iter().any(|t| t.ndim() == 0) {
            return Err(OpError::invalid("cat", "zero-dimensional tensor cannot be concatenated"));
        }
        let ndim = first.ndim();
        let axis = wrap_dim("cat", dim, ndim)?;
        for t in &tensors[1..] {
            let compatible = t.ndim() == ndim
                && t.shape()
                    .iter()
                    .zip(first.shape())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(OpError::shape_mismatch("cat", first.shape(), t.shape()));
            }
        }

        let dtype = tensors.iter().skip(1).fold(first.dtype(), |acc, t| promote(acc, t.dtype()));
        let converted = tensors
            .iter()
            .map(|t| t.to_dtype(dtype))
            .collect::<Outcome<Vec<_>>>()?;

        macro_rules! concat_as {
            ($variant:ident) => {{
                let views: Vec<_> = converted
                    .iter()
                    .filter_map(|t| match t.storage() {
                        Storage::$variant(a) => Some(a.view()),
                        _ => None,
                    })
                    .collect();
                if views.len() != converted.len() {
                    return Err(OpError::Unexpected("cat inputs disagree on storage".into()));
                }
                Storage::$variant(ndarray::concatenate(Axis(axis), &views)?)
            }};
        }

        let storage = match converted[0].storage() {
            Storage::Float(_) => concat_as!(Float),
            Storage::Int(_) => concat_as!(Int),
            Storage::Bool(_) => concat_as!(Bool),
            Storage::Complex(_) => concat_as!(Complex),
        };
        NdTensor::new(dtype, storage)
    }
}
