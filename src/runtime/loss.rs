//! Pointwise regression and binary classification losses.

use ndarray::Zip;

use super::elementwise::promote;
use super::tensor::broadcast_shape;
use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    None,
    #[default]
    Mean,
    Sum,
}

impl Reduction {
    pub const ALL: [Reduction; 3] = [Reduction::None, Reduction::Mean, Reduction::Sum];
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Loss {
    L1,
    Mse,
    /// Quadratic below `delta`, linear above.
    Huber { delta: f64 },
    /// Huber divided by `beta`; plain L1 at `beta == 0`.
    SmoothL1 { beta: f64 },
    /// Binary cross entropy on probabilities in `[0, 1]`. Log terms are
    /// clamped at -100.
    BinaryCrossEntropy,
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::L1 => "l1_loss",
            Loss::Mse => "mse_loss",
            Loss::Huber { .. } => "huber_loss",
            Loss::SmoothL1 { .. } => "smooth_l1_loss",
            Loss::BinaryCrossEntropy => "binary_cross_entropy",
        }
    }

    fn validate(&self) -> Outcome<()> {
        match *self {
            Loss::Huber { delta } if delta.is_nan() || delta <= 0.0 => Err(OpError::invalid(
                self.name(),
                "huber_loss does not support non-positive values for delta.",
            )),
            Loss::SmoothL1 { beta } if beta.is_nan() || beta < 0.0 => Err(OpError::invalid(
                self.name(),
                "smooth_l1_loss does not support negative values for beta.",
            )),
            _ => Ok(()),
        }
    }

    fn pointwise(&self, x: f64, y: f64) -> f64 {
        let r = (x - y).abs();
        match *self {
            Loss::L1 => r,
            Loss::Mse => r * r,
            Loss::Huber { delta } => {
                if r < delta {
                    0.5 * r * r
                } else {
                    delta * (r - 0.5 * delta)
                }
            }
            Loss::SmoothL1 { beta } => {
                if r < beta {
                    0.5 * r * r / beta
                } else {
                    r - 0.5 * beta
                }
            }
            Loss::BinaryCrossEntropy => {
                let log_x = x.ln().max(-100.0);
                let log_1mx = (1.0 - x).ln().max(-100.0);
                -(y * log_x + (1.0 - y) * log_1mx)
            }
        }
    }
}

impl NdRuntime {
    /// `loss(input, target)` broadcast elementwise, then reduced.
    pub fn loss(&self, loss: Loss, input: &NdTensor, target: &NdTensor, reduction: Reduction) -> Outcome<NdTensor> {
        let op = loss.name();
        loss.validate()?;
        let dtype = promote(input.dtype(), target.dtype());
        if !dtype.is_float() {
            return Err(OpError::unsupported(op, dtype));
        }
        let shape = broadcast_shape(input.shape(), target.shape())
            .ok_or_else(|| OpError::shape_mismatch(op, input.shape(), target.shape()))?;
        if matches!(loss, Loss::BinaryCrossEntropy) && input.shape() != target.shape() {
            return Err(OpError::invalid(
                op,
                format!(
                    "Using a target size ({:?}) that is different to the input size ({:?}) is deprecated",
                    target.shape(),
                    input.shape()
                ),
            ));
        }

        let x = input.real_array(op)?;
        let y = target.real_array(op)?;
        if matches!(loss, Loss::BinaryCrossEntropy) && x.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(OpError::invalid(op, "all elements of input should be between 0 and 1"));
        }
        let dim = ndarray::IxDyn(&shape);
        let broadcast_error = || OpError::Unexpected("broadcast failed after shape check".into());
        let xb = x.broadcast(dim.clone()).ok_or_else(broadcast_error)?;
        let yb = y.broadcast(dim).ok_or_else(broadcast_error)?;
        let elementwise = Zip::from(&xb).and(&yb).map_collect(|&p, &q| loss.pointwise(p, q));

        let out = match reduction {
            Reduction::None => elementwise,
            Reduction::Sum => ndarray::arr0(self.accumulate(elementwise.iter().copied())).into_dyn(),
            Reduction::Mean => {
                let n = elementwise.len() as f64;
                ndarray::arr0(self.accumulate(elementwise.iter().copied()) / n).into_dyn()
            }
        };
        NdTensor::float(dtype, out)
    }
}
