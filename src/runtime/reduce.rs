//! Reductions, norms, quantiles and softmax.

use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex64;

use super::tensor::{int_values, Storage};
use super::{wrap_dim, NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};
use crate::models::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Prod,
    Max,
    Min,
}

impl ReduceOp {
    pub const ALL: [ReduceOp; 5] = [
        ReduceOp::Sum,
        ReduceOp::Mean,
        ReduceOp::Prod,
        ReduceOp::Max,
        ReduceOp::Min,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Prod => "prod",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormOrd {
    L1,
    L2,
    Inf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Lower,
    Higher,
    Midpoint,
    Nearest,
}

impl Interpolation {
    pub const ALL: [Interpolation; 5] = [
        Interpolation::Linear,
        Interpolation::Lower,
        Interpolation::Higher,
        Interpolation::Midpoint,
        Interpolation::Nearest,
    ];
}

/// Applies `f` to every lane along `dim`, or to all elements when `dim` is
/// `None` or the array is 0-d.
fn reduce_lanes<T: Clone, U: Clone>(
    array: &ArrayD<T>,
    dim: Option<usize>,
    keepdim: bool,
    mut f: impl FnMut(Vec<T>) -> U,
) -> ArrayD<U> {
    let ndim = array.ndim();
    match dim {
        Some(d) if ndim > 0 => {
            let reduced = array.map_axis(Axis(d), |lane| f(lane.to_vec()));
            if keepdim {
                reduced.insert_axis(Axis(d))
            } else {
                reduced
            }
        }
        _ => {
            let value = f(array.iter().cloned().collect());
            let shape = if keepdim { vec![1; ndim] } else { Vec::new() };
            ArrayD::from_elem(IxDyn(&shape), value)
        }
    }
}

fn has_empty_lane(shape: &[usize], dim: Option<usize>) -> bool {
    match dim {
        Some(d) if !shape.is_empty() => shape[d] == 0,
        _ => shape.iter().product::<usize>() == 0,
    }
}

impl NdRuntime {
    fn resolve_dim(&self, op: &'static str, dim: Option<i64>, ndim: usize) -> Outcome<Option<usize>> {
        dim.map(|d| wrap_dim(op, d, ndim)).transpose()
    }

    pub fn reduce(
        &self,
        op: ReduceOp,
        x: &NdTensor,
        dim: Option<i64>,
        keepdim: bool,
    ) -> Outcome<NdTensor> {
        let name = op.name();
        let axis = self.resolve_dim(name, dim, x.ndim())?;

        if matches!(op, ReduceOp::Max | ReduceOp::Min) && has_empty_lane(x.shape(), axis) {
            return Err(OpError::invalid(
                name,
                "expected reduction dim to be specified for input.numel() == 0",
            ));
        }

        match x.storage() {
            Storage::Float(a) => {
                let out = reduce_lanes(a, axis, keepdim, |lane| match op {
                    ReduceOp::Sum => self.accumulate(lane),
                    ReduceOp::Mean => {
                        let n = lane.len() as f64;
                        self.accumulate(lane) / n
                    }
                    ReduceOp::Prod => lane.iter().product(),
                    ReduceOp::Max => lane
                        .into_iter()
                        .reduce(|m, v| if m.is_nan() || v.is_nan() { f64::NAN } else { m.max(v) })
                        .unwrap_or(f64::NAN),
                    ReduceOp::Min => lane
                        .into_iter()
                        .reduce(|m, v| if m.is_nan() || v.is_nan() { f64::NAN } else { m.min(v) })
                        .unwrap_or(f64::NAN),
                });
                NdTensor::float(x.dtype(), out)
            }
            Storage::Complex(a) => {
                let out = match op {
                    ReduceOp::Sum => reduce_lanes(a, axis, keepdim, |lane| lane.into_iter().sum::<Complex64>()),
                    ReduceOp::Mean => reduce_lanes(a, axis, keepdim, |lane| {
                        let n = lane.len() as f64;
                        lane.into_iter().sum::<Complex64>() / n
                    }),
                    ReduceOp::Prod => reduce_lanes(a, axis, keepdim, |lane| lane.into_iter().product::<Complex64>()),
                    ReduceOp::Max | ReduceOp::Min => return Err(OpError::unsupported(name, x.dtype())),
                };
                NdTensor::complex(x.dtype(), out)
            }
            Storage::Bool(a) if matches!(op, ReduceOp::Max | ReduceOp::Min) => {
                let out = reduce_lanes(a, axis, keepdim, |lane| match op {
                    ReduceOp::Max => lane.into_iter().any(|v| v),
                    _ => lane.into_iter().all(|v| v),
                });
                Ok(NdTensor::bool(out))
            }
            Storage::Int(_) | Storage::Bool(_) => {
                if op == ReduceOp::Mean {
                    return Err(OpError::invalid(
                        name,
                        format!(
                            "could not infer output dtype; input dtype must be floating point or complex, got {}",
                            x.dtype()
                        ),
                    ));
                }
                let values = int_values(x.storage());
                let out = reduce_lanes(&values, axis, keepdim, |lane| match op {
                    ReduceOp::Prod => lane.into_iter().fold(1i64, |acc, v| acc.wrapping_mul(v)),
                    ReduceOp::Max => lane.into_iter().max().unwrap_or_default(),
                    ReduceOp::Min => lane.into_iter().min().unwrap_or_default(),
                    _ => lane.into_iter().fold(0i64, |acc, v| acc.wrapping_add(v)),
                });
                // sums and products accumulate in int64, extrema keep the dtype
                let dtype = if matches!(op, ReduceOp::Max | ReduceOp::Min) {
                    x.dtype()
                } else {
                    DType::I64
                };
                NdTensor::int(dtype, out)
            }
        }
    }

    pub fn norm(&self, x: &NdTensor, ord: NormOrd, dim: Option<i64>, keepdim: bool) -> Outcome<NdTensor> {
        let axis = self.resolve_dim("norm", dim, x.ndim())?;
        let (magnitudes, dtype) = match x.storage() {
            Storage::Float(a) => (a.mapv(f64::abs), x.dtype()),
            Storage::Complex(a) => (
                a.mapv(|v| v.norm()),
                if x.dtype() == DType::C64 { DType::F32 } else { DType::F64 },
            ),
            _ => return Err(OpError::unsupported("norm", x.dtype())),
        };
        if ord == NormOrd::Inf && has_empty_lane(x.shape(), axis) {
            return Err(OpError::invalid(
                "norm",
                "cannot compute the infinity norm of an empty reduction",
            ));
        }
        let out = reduce_lanes(&magnitudes, axis, keepdim, |lane| match ord {
            NormOrd::L1 => self.accumulate(lane),
            NormOrd::L2 => self.accumulate(lane.into_iter().map(|v| v * v)).sqrt(),
            NormOrd::Inf => lane
                .into_iter()
                .reduce(|m, v| if m.is_nan() || v.is_nan() { f64::NAN } else { m.max(v) })
                .unwrap_or(0.0),
        });
        NdTensor::float(dtype, out)
    }

    /// `quantile` when `ignore_nan` is false, `nanquantile` otherwise.
    pub fn quantile(
        &self,
        x: &NdTensor,
        q: f64,
        dim: Option<i64>,
        keepdim: bool,
        interpolation: Interpolation,
        ignore_nan: bool,
    ) -> Outcome<NdTensor> {
        let op = if ignore_nan { "nanquantile" } else { "quantile" };
        let a = x.float_array(op)?;
        if !(0.0..=1.0).contains(&q) {
            return Err(OpError::invalid(op, format!("q must be in the range [0, 1] but got {q}")));
        }
        if x.numel() == 0 {
            return Err(OpError::invalid(op, "input tensor must be non-empty"));
        }
        let axis = self.resolve_dim(op, dim, x.ndim())?;

        let out = reduce_lanes(a, axis, keepdim, |lane| {
            if !ignore_nan && lane.iter().any(|v| v.is_nan()) {
                return f64::NAN;
            }
            let mut sorted: Vec<f64> = lane.into_iter().filter(|v| !v.is_nan()).collect();
            if sorted.is_empty() {
                return f64::NAN;
            }
            sorted.sort_by(f64::total_cmp);
            let rank = q * (sorted.len() - 1) as f64;
            let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
            let (below, above) = (sorted[lo], sorted[hi]);
            match interpolation {
                Interpolation::Linear => below + (above - below) * (rank - lo as f64),
                Interpolation::Lower => below,
                Interpolation::Higher => above,
                Interpolation::Midpoint => (below + above) / 2.0,
                Interpolation::Nearest => sorted[rank.round_ties_even() as usize],
            }
        });
        NdTensor::float(x.dtype(), out)
    }

    pub fn softmax(&self, x: &NdTensor, dim: i64) -> Outcome<NdTensor> {
        let a = x.float_array("softmax")?;
        let axis = wrap_dim("softmax", dim, x.ndim())?;
        if x.ndim() == 0 {
            return NdTensor::float(x.dtype(), a.mapv(|v| if v.is_nan() { v } else { 1.0 }));
        }
        let mut out = a.clone();
        for mut lane in out.lanes_mut(Axis(axis)) {
            let max = lane
                .iter()
                .copied()
                .reduce(|m, v| if m.is_nan() || v.is_nan() { f64::NAN } else { m.max(v) })
                .unwrap_or(0.0);
            lane.mapv_inplace(|v| (v - max).exp());
            let total = self.accumulate(lane.iter().copied());
            lane.mapv_inplace(|v| v / total);
        }
        NdTensor::float(x.dtype(), out)
    }
}
