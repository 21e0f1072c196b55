//! The target catalog.
//!
//! Each target decodes its arguments positionally from the input, calls one
//! family of runtime operators and runs a few diagnostic checks. Checks only
//! log; the driver decides the status from the call outcome alone.

mod batch_norm;
mod config_scope;
mod conv;
mod decode;
mod elementwise;
mod fft;
mod linalg;
mod loss;
mod pool;
mod quantize;
mod reduce;
mod rnn_cell;
mod serialize;
mod shape;

use std::collections::BTreeMap;

use lazy_static::lazy_static;

use crate::error::{OpError, Outcome};
use crate::harness::{Case, Target};
use crate::runtime::{NdTensor, Storage};

static ALL: [Target; 16] = [
    decode::TARGET,
    elementwise::UNARY,
    elementwise::BINARY,
    reduce::REDUCE,
    reduce::NANQUANTILE,
    shape::TARGET,
    linalg::TARGET,
    conv::TARGET,
    rnn_cell::TARGET,
    quantize::TARGET,
    serialize::TARGET,
    config_scope::TARGET,
    fft::TARGET,
    pool::TARGET,
    batch_norm::TARGET,
    loss::TARGET,
];

lazy_static! {
    static ref BY_NAME: BTreeMap<&'static str, &'static Target> =
        ALL.iter().map(|t| (t.name, t)).collect();
}

/// Every registered target, in catalog order.
pub fn all() -> &'static [Target] {
    &ALL
}

pub fn find(name: &str) -> Option<&'static Target> {
    BY_NAME.get(name).copied()
}

/// Turns an expected error from a secondary variant into `None` so the
/// body can carry on; unexpected errors still abort the case.
pub(crate) fn tolerate<T>(outcome: Outcome<T>) -> Outcome<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(OpError::Expected(e)) => {
            tracing::debug!(error = %e, "variant rejected");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Decodes a tensor and casts it to the runtime's default float dtype
/// unless it already is a real float.
pub(crate) fn float_tensor(case: &mut Case<'_>) -> Outcome<NdTensor> {
    let x = case.tensor()?;
    if x.is_floating_point() {
        Ok(x)
    } else {
        x.to_dtype(case.runtime.config().default_float)
    }
}

/// Overwrites the element at `index % numel` of a float tensor.
pub(crate) fn inject(x: &mut NdTensor, index: u64, value: f64) {
    if let Storage::Float(a) = x.storage_mut() {
        let n = a.len() as u64;
        if n > 0 {
            if let Some(slot) = a.iter_mut().nth((index % n) as usize) {
                *slot = value;
            }
        }
    }
}

/// Real element values, empty for complex tensors.
pub(crate) fn real_values(x: &NdTensor) -> Vec<f64> {
    x.real_array("inspect")
        .map(|a| a.iter().copied().collect())
        .unwrap_or_default()
}

/// Float values for NaN/Inf injection: none, NaN, +inf, -inf.
pub(crate) fn special_value(selector: usize) -> Option<f64> {
    match selector {
        1 => Some(f64::NAN),
        2 => Some(f64::INFINITY),
        3 => Some(f64::NEG_INFINITY),
        _ => None,
    }
}
