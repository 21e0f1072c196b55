//! 2-D max and average pooling.

use ndarray::{Array4, Axis, Ix4};

use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};
use crate::models::DType;

/// Window geometry shared by the pooling ops. `dilation` only applies to max
/// pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParams {
    pub kernel: [i64; 2],
    pub stride: [i64; 2],
    pub padding: [i64; 2],
    pub dilation: [i64; 2],
    pub ceil_mode: bool,
}

impl PoolParams {
    /// Square window with stride equal to the kernel.
    pub fn new(kernel: i64) -> Self {
        Self {
            kernel: [kernel; 2],
            stride: [kernel; 2],
            padding: [0; 2],
            dilation: [1; 2],
            ceil_mode: false,
        }
    }

    fn validate(&self, op: &'static str, dilated: bool) -> Outcome<()> {
        if self.kernel.iter().any(|&k| k <= 0) {
            return Err(OpError::invalid(op, "kernel size should be greater than zero"));
        }
        if self.stride.iter().any(|&s| s <= 0) {
            return Err(OpError::invalid(op, "stride should be greater than zero"));
        }
        if self.dilation.iter().any(|&d| d <= 0) {
            return Err(OpError::invalid(op, "dilation should be greater than zero"));
        }
        for i in 0..2 {
            let dilation = if dilated { self.dilation[i] } else { 1 };
            let effective = dilation * (self.kernel[i] - 1) + 1;
            if self.padding[i] < 0 || self.padding[i] > effective / 2 {
                return Err(OpError::invalid(
                    op,
                    format!(
                        "pad should be at most half of effective kernel size, but got pad={}, kernel_size={} and dilation={}",
                        self.padding[i], self.kernel[i], dilation
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Output length of one pooled dimension, ceil mode included.
fn pooled_len(input: usize, kernel: i64, stride: i64, padding: i64, dilation: i64, ceil_mode: bool) -> i64 {
    let input = input as i64;
    let span = input + 2 * padding - dilation * (kernel - 1) - 1;
    let round_up = if ceil_mode { stride - 1 } else { 0 };
    let mut out = (span + round_up).div_euclid(stride) + 1;
    // the last window has to start inside the input or the left padding
    if ceil_mode && (out - 1) * stride >= input + padding {
        out -= 1;
    }
    out
}

impl NdRuntime {
    /// Validates the input and returns it as a batched 4-D float array plus
    /// the pooled height and width.
    fn pool_input(
        &self,
        op: &'static str,
        x: &NdTensor,
        params: &PoolParams,
        dilated: bool,
    ) -> Outcome<(Array4<f64>, bool, [usize; 2])> {
        params.validate(op, dilated)?;
        let a = x.float_array(op)?;
        let unbatched = match a.ndim() {
            3 => true,
            4 => false,
            _ => {
                return Err(OpError::invalid(
                    op,
                    format!("Expected 3D or 4D (batch mode) tensor for input, got shape {:?}", x.shape()),
                ));
            }
        };
        let spatial_start = a.ndim() - 3;
        if a.shape()[spatial_start..].iter().any(|&d| d == 0) {
            return Err(OpError::invalid(
                op,
                format!("Expected input with non-zero channel and spatial sizes, got shape {:?}", x.shape()),
            ));
        }
        let a = if unbatched { a.clone().insert_axis(Axis(0)) } else { a.clone() };
        let a = a.into_dimensionality::<Ix4>()?;
        let (_, _, h, w) = a.dim();

        let dilation = if dilated { params.dilation } else { [1, 1] };
        let oh = pooled_len(h, params.kernel[0], params.stride[0], params.padding[0], dilation[0], params.ceil_mode);
        let ow = pooled_len(w, params.kernel[1], params.stride[1], params.padding[1], dilation[1], params.ceil_mode);
        if oh < 1 || ow < 1 {
            return Err(OpError::invalid(
                op,
                format!("Given input size: ({h}x{w}). Calculated output size: ({oh}x{ow}). Output size is too small"),
            ));
        }
        Ok((a, unbatched, [oh as usize, ow as usize]))
    }

    /// Max over each dilated window. Returns the pooled values and the
    /// flat `h * W + w` index of each maximum as an `I64` tensor. NaN wins.
    pub fn max_pool2d(&self, x: &NdTensor, params: &PoolParams) -> Outcome<(NdTensor, NdTensor)> {
        let op = "max_pool2d";
        let (a, unbatched, [oh, ow]) = self.pool_input(op, x, params, true)?;
        let (batch, channels, h, w) = a.dim();
        let [kh, kw] = params.kernel;
        let [sh, sw] = params.stride;
        let [ph, pw] = params.padding;
        let [dh, dw] = params.dilation;

        let mut values = Array4::<f64>::zeros((batch, channels, oh, ow));
        let mut indices = Array4::<i64>::zeros((batch, channels, oh, ow));
        for n in 0..batch {
            for c in 0..channels {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut best = f64::NEG_INFINITY;
                        let mut best_index = -1i64;
                        for ky in 0..kh {
                            let iy = oy as i64 * sh - ph + ky * dh;
                            if iy < 0 || iy >= h as i64 {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = ox as i64 * sw - pw + kx * dw;
                                if ix < 0 || ix >= w as i64 {
                                    continue;
                                }
                                let v = a[(n, c, iy as usize, ix as usize)];
                                if best_index < 0 || v > best || (v.is_nan() && !best.is_nan()) {
                                    best = v;
                                    best_index = iy * w as i64 + ix;
                                }
                            }
                        }
                        values[(n, c, oy, ox)] = best;
                        indices[(n, c, oy, ox)] = best_index;
                    }
                }
            }
        }

        let (values, indices) = (values.into_dyn(), indices.into_dyn());
        let (values, indices) = if unbatched {
            (values.index_axis_move(Axis(0), 0), indices.index_axis_move(Axis(0), 0))
        } else {
            (values, indices)
        };
        Ok((NdTensor::float(x.dtype(), values)?, NdTensor::int(DType::I64, indices)?))
    }

    /// Mean over each window. Padding counts toward the divisor when
    /// `count_include_pad` is set; ceil-mode overhang never does.
    pub fn avg_pool2d(&self, x: &NdTensor, params: &PoolParams, count_include_pad: bool) -> Outcome<NdTensor> {
        let op = "avg_pool2d";
        let (a, unbatched, [oh, ow]) = self.pool_input(op, x, params, false)?;
        let (batch, channels, h, w) = a.dim();
        let [kh, kw] = params.kernel;
        let [sh, sw] = params.stride;
        let [ph, pw] = params.padding;

        let mut out = Array4::<f64>::zeros((batch, channels, oh, ow));
        for n in 0..batch {
            for c in 0..channels {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let y0 = oy as i64 * sh - ph;
                        let x0 = ox as i64 * sw - pw;
                        let y1 = (y0 + kh).min(h as i64 + ph);
                        let x1 = (x0 + kw).min(w as i64 + pw);
                        let padded_count = (y1 - y0) * (x1 - x0);
                        let (y0, x0) = (y0.max(0), x0.max(0));
                        let (y1, x1) = (y1.min(h as i64), x1.min(w as i64));

                        let mut terms = Vec::new();
                        for iy in y0..y1 {
                            for ix in x0..x1 {
                                terms.push(a[(n, c, iy as usize, ix as usize)]);
                            }
                        }
                        let divisor = if count_include_pad {
                            padded_count
                        } else {
                            (y1 - y0) * (x1 - x0)
                        };
                        out[(n, c, oy, ox)] = self.accumulate(terms) / divisor as f64;
                    }
                }
            }
        }

        let out = out.into_dyn();
        let out = if unbatched { out.index_axis_move(Axis(0), 0) } else { out };
        NdTensor::float(x.dtype(), out)
    }
}
