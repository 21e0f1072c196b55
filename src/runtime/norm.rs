//! Batch normalization over the channel dim.

use ndarray::{ArrayD, Axis};

use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};

/// Running statistics updated by training-mode batch norm.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    pub mean: NdTensor,
    pub var: NdTensor,
}

impl RunningStats {
    /// Zero mean and unit variance for `channels` channels.
    pub fn new(dtype: crate::models::DType, channels: usize) -> Outcome<Self> {
        Ok(Self {
            mean: NdTensor::from_vec(dtype, &[channels], vec![0.0; channels])?,
            var: NdTensor::from_vec(dtype, &[channels], vec![1.0; channels])?,
        })
    }
}

/// Batch norm settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNormParams {
    pub training: bool,
    pub momentum: f64,
    pub eps: f64,
}

impl Default for BatchNormParams {
    fn default() -> Self {
        Self {
            training: false,
            momentum: 0.1,
            eps: 1e-5,
        }
    }
}

/// Per-channel values of an optional `[C]` tensor, or `fill`.
fn channel_values(op: &'static str, what: &str, t: Option<&NdTensor>, channels: usize, fill: f64) -> Outcome<Vec<f64>> {
    let Some(t) = t else {
        return Ok(vec![fill; channels]);
    };
    let values = t.real_array(op)?;
    if values.len() != channels || t.ndim() != 1 {
        return Err(OpError::invalid(
            op,
            format!("{what} should contain {channels} elements not {}", values.len()),
        ));
    }
    Ok(values.iter().copied().collect())
}

impl NdRuntime {
    /// Normalizes `[N, C, *]` input per channel.
    ///
    /// In training mode, or when `running` is `None`, the batch statistics
    /// are used (biased variance) and `running` is blended toward them with
    /// `momentum`, using the unbiased variance. Otherwise the running
    /// statistics are used as they are.
    pub fn batch_norm(
        &self,
        input: &NdTensor,
        weight: Option<&NdTensor>,
        bias: Option<&NdTensor>,
        running: Option<&mut RunningStats>,
        params: &BatchNormParams,
    ) -> Outcome<NdTensor> {
        let op = "batch_norm";
        let x = input.float_array(op)?;
        if x.ndim() < 2 {
            return Err(OpError::invalid(
                op,
                format!("expected at least 2D input (got {}D input)", x.ndim()),
            ));
        }
        let channels = x.shape()[1];
        let per_channel = x.len().checked_div(channels).unwrap_or(0);
        let gamma = channel_values(op, "weight", weight, channels, 1.0)?;
        let beta = channel_values(op, "bias", bias, channels, 0.0)?;

        let use_batch = params.training || running.is_none();
        if params.training && per_channel <= 1 {
            return Err(OpError::invalid(
                op,
                format!("Expected more than 1 value per channel when training, got input size {:?}", input.shape()),
            ));
        }

        let (mean, var) = if use_batch {
            let mut mean = Vec::with_capacity(channels);
            let mut var = Vec::with_capacity(channels);
            for lane in x.axis_iter(Axis(1)) {
                let n = lane.len() as f64;
                let m = self.accumulate(lane.iter().copied()) / n;
                let v = self.accumulate(lane.iter().map(|&e| (e - m) * (e - m))) / n;
                mean.push(m);
                var.push(v);
            }
            (mean, var)
        } else {
            let stats = running.as_deref().ok_or_else(|| OpError::Unexpected("running stats vanished".into()))?;
            (
                channel_values(op, "running_mean", Some(&stats.mean), channels, 0.0)?,
                channel_values(op, "running_var", Some(&stats.var), channels, 1.0)?,
            )
        };

        if params.training {
            if let Some(stats) = running {
                let old_mean = channel_values(op, "running_mean", Some(&stats.mean), channels, 0.0)?;
                let old_var = channel_values(op, "running_var", Some(&stats.var), channels, 1.0)?;
                let m = params.momentum;
                let unbias = per_channel as f64 / (per_channel as f64 - 1.0);
                let next_mean = old_mean.iter().zip(&mean).map(|(r, b)| (1.0 - m) * r + m * b).collect();
                let next_var = old_var.iter().zip(&var).map(|(r, b)| (1.0 - m) * r + m * b * unbias).collect();
                stats.mean = NdTensor::from_vec(stats.mean.dtype(), &[channels], next_mean)?;
                stats.var = NdTensor::from_vec(stats.var.dtype(), &[channels], next_var)?;
            }
        }

        let mut out: ArrayD<f64> = x.clone();
        for (c, mut lane) in out.axis_iter_mut(Axis(1)).enumerate() {
            let inv_std = 1.0 / (var[c] + params.eps).sqrt();
            lane.mapv_inplace(|v| (v - mean[c]) * inv_std * gamma[c] + beta[c]);
        }
        NdTensor::float(input.dtype(), out)
    }
}
