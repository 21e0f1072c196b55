//! Direct (non-im2col) 1-D and 2-D convolutions.

use ndarray::{Array4, ArrayD, Axis, Ix4};

use super::tensor::Storage;
use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};

/// Stride, padding and dilation for each spatial dimension, plus groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams<const N: usize> {
    pub stride: [i64; N],
    pub padding: [i64; N],
    pub dilation: [i64; N],
    pub groups: i64,
}

impl<const N: usize> Default for ConvParams<N> {
    fn default() -> Self {
        Self {
            stride: [1; N],
            padding: [0; N],
            dilation: [1; N],
            groups: 1,
        }
    }
}

impl<const N: usize> ConvParams<N> {
    fn validate(&self, op: &'static str) -> Outcome<()> {
        if self.groups <= 0 {
            return Err(OpError::invalid(op, "non-positive groups is not supported"));
        }
        if self.stride.iter().any(|&s| s <= 0) {
            return Err(OpError::invalid(op, "non-positive stride is not supported"));
        }
        if self.padding.iter().any(|&p| p < 0) {
            return Err(OpError::invalid(op, "negative padding is not supported"));
        }
        if self.dilation.iter().any(|&d| d <= 0) {
            return Err(OpError::invalid(op, "dilation should be greater than zero"));
        }
        Ok(())
    }
}

fn float_operand<'a>(op: &'static str, t: &'a NdTensor) -> Outcome<&'a ArrayD<f64>> {
    match t.storage() {
        Storage::Float(a) => Ok(a),
        _ => Err(OpError::unsupported(op, t.dtype())),
    }
}

fn out_len(op: &'static str, input: usize, kernel: usize, stride: i64, padding: i64, dilation: i64) -> Outcome<usize> {
    if kernel == 0 {
        return Err(OpError::invalid(op, "kernel size must be greater than zero"));
    }
    let padded = input as i64 + 2 * padding;
    let effective = dilation * (kernel as i64 - 1) + 1;
    if padded < effective {
        return Err(OpError::invalid(
            op,
            format!("calculated padded input size ({padded}) is less than the effective kernel size ({effective})"),
        ));
    }
    Ok(((padded - effective) / stride + 1) as usize)
}

impl NdRuntime {
    /// `input` is `[N, C_in, H, W]` or unbatched `[C_in, H, W]`; `weight` is
    /// `[C_out, C_in / groups, kH, kW]`.
    pub fn conv2d(
        &self,
        input: &NdTensor,
        weight: &NdTensor,
        bias: Option<&NdTensor>,
        params: &ConvParams<2>,
    ) -> Outcome<NdTensor> {
        let op = "conv2d";
        params.validate(op)?;
        let x = float_operand(op, input)?;
        let w = float_operand(op, weight)?;
        if input.dtype() != weight.dtype() || bias.is_some_and(|b| b.dtype() != input.dtype()) {
            return Err(OpError::invalid(op, "input, weight and bias must have the same dtype"));
        }

        let unbatched = match x.ndim() {
            3 => true,
            4 => false,
            n => {
                return Err(OpError::invalid(
                    op,
                    format!("expected 3D (unbatched) or 4D (batched) input, got {n}D"),
                ));
            }
        };
        if w.ndim() != 4 {
            return Err(OpError::invalid(op, format!("expected 4D weight, got {}D", w.ndim())));
        }
        let x = if unbatched { x.clone().insert_axis(Axis(0)) } else { x.clone() };
        let x = x.into_dimensionality::<Ix4>()?;
        let w = w.clone().into_dimensionality::<Ix4>()?;
        let (batch, c_in, h, wd) = x.dim();
        let (c_out, c_per_group, kh, kw) = w.dim();
        let groups = params.groups as usize;

        if c_out % groups != 0 || c_per_group * groups != c_in {
            return Err(OpError::shape_mismatch(op, input.shape(), weight.shape()));
        }
        let bias_values: Vec<f64> = match bias {
            Some(b) => {
                let values = float_operand(op, b)?;
                if values.shape() != &[c_out] {
                    return Err(OpError::shape_mismatch(op, weight.shape(), b.shape()));
                }
                values.iter().copied().collect()
            }
            None => vec![0.0; c_out],
        };

        let oh = out_len(op, h, kh, params.stride[0], params.padding[0], params.dilation[0])?;
        let ow = out_len(op, wd, kw, params.stride[1], params.padding[1], params.dilation[1])?;
        let [sh, sw] = params.stride;
        let [ph, pw] = params.padding;
        let [dh, dw] = params.dilation;
        let out_per_group = c_out / groups;

        let mut out = Array4::<f64>::zeros((batch, c_out, oh, ow));
        for n in 0..batch {
            for oc in 0..c_out {
                let g = oc / out_per_group;
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut terms = Vec::with_capacity(c_per_group * kh * kw);
                        for ic in 0..c_per_group {
                            let channel = g * c_per_group + ic;
                            for ky in 0..kh {
                                let iy = (oy as i64) * sh - ph + (ky as i64) * dh;
                                if iy < 0 || iy >= h as i64 {
                                    continue;
                                }
                                for kx in 0..kw {
                                    let ix = (ox as i64) * sw - pw + (kx as i64) * dw;
                                    if ix < 0 || ix >= wd as i64 {
                                        continue;
                                    }
                                    terms.push(x[(n, channel, iy as usize, ix as usize)] * w[(oc, ic, ky, kx)]);
                                }
                            }
                        }
                        out[(n, oc, oy, ox)] = bias_values[oc] + self.accumulate(terms);
                    }
                }
            }
        }

        let out = out.into_dyn();
        let out = if unbatched { out.index_axis_move(Axis(0), 0) } else { out };
        NdTensor::float(input.dtype(), out)
    }

    /// `input` is `[N, C_in, L]` or `[C_in, L]`; `weight` is
    /// `[C_out, C_in / groups, k]`. Runs as a 2-D convolution of height 1.
    pub fn conv1d(
        &self,
        input: &NdTensor,
        weight: &NdTensor,
        bias: Option<&NdTensor>,
        params: &ConvParams<1>,
    ) -> Outcome<NdTensor> {
        let op = "conv1d";
        params.validate(op)?;
        let spatial = match input.ndim() {
            2 | 3 => input.ndim() - 1,
            n => {
                return Err(OpError::invalid(
                    op,
                    format!("expected 2D (unbatched) or 3D (batched) input, got {n}D"),
                ));
            }
        };
        if weight.ndim() != 3 {
            return Err(OpError::invalid(op, format!("expected 3D weight, got {}D", weight.ndim())));
        }
        let input = self.unsqueeze(input, spatial as i64)?;
        let weight = self.unsqueeze(weight, 2)?;
        let lifted = ConvParams::<2> {
            stride: [1, params.stride[0]],
            padding: [0, params.padding[0]],
            dilation: [1, params.dilation[0]],
            groups: params.groups,
        };
        let out = self.conv2d(&input, &weight, bias, &lifted)?;
        self.squeeze(&out, Some(spatial as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DType;

    fn ramp(shape: &[usize]) -> NdTensor {
        let n: usize = shape.iter().product();
        NdTensor::from_vec(DType::F64, shape, (0..n).map(|v| v as f64).collect()).unwrap()
    }

    fn flat(t: &NdTensor) -> Vec<f64> {
        t.float_array("t").unwrap().iter().copied().collect()
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let rt = NdRuntime::default();
        let x = ramp(&[1, 1, 3, 3]);
        let w = NdTensor::from_vec(DType::F64, &[1, 1, 1, 1], vec![2.0]).unwrap();
        let out = rt.conv2d(&x, &w, None, &ConvParams::default()).unwrap();
        assert_eq!(out.shape(), &[1, 1, 3, 3]);
        assert_eq!(flat(&out), (0..9).map(|v| 2.0 * v as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_conv2d_padding_stride_bias() {
        let rt = NdRuntime::default();
        let x = NdTensor::from_vec(DType::F64, &[1, 2, 2], vec![1.0; 4]).unwrap();
        let w = NdTensor::from_vec(DType::F64, &[1, 1, 2, 2], vec![1.0; 4]).unwrap();
        let b = NdTensor::from_vec(DType::F64, &[1], vec![0.5]).unwrap();
        let params = ConvParams {
            stride: [2, 2],
            padding: [1, 1],
            ..ConvParams::default()
        };
        let out = rt.conv2d(&x, &w, Some(&b), &params).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2]);
        assert_eq!(flat(&out), vec![1.5; 4]);
    }

    #[test]
    fn test_conv2d_groups() {
        let rt = NdRuntime::default();
        let x = ramp(&[1, 2, 1, 1]);
        let w = NdTensor::from_vec(DType::F64, &[2, 1, 1, 1], vec![10.0, 100.0]).unwrap();
        let params = ConvParams {
            groups: 2,
            ..ConvParams::default()
        };
        let out = rt.conv2d(&x, &w, None, &params).unwrap();
        assert_eq!(flat(&out), vec![0.0, 100.0]);

        let bad = ConvParams {
            groups: 3,
            ..ConvParams::default()
        };
        assert!(rt.conv2d(&x, &w, None, &bad).unwrap_err().is_expected());
    }

    #[test]
    fn test_conv2d_rejects_bad_params() {
        let rt = NdRuntime::default();
        let x = ramp(&[1, 1, 2, 2]);
        let w = ramp(&[1, 1, 3, 3]);
        assert!(rt.conv2d(&x, &w, None, &ConvParams::default()).unwrap_err().is_expected());

        let w = ramp(&[1, 1, 1, 1]);
        let zero_stride = ConvParams {
            stride: [0, 1],
            ..ConvParams::default()
        };
        assert!(rt.conv2d(&x, &w, None, &zero_stride).unwrap_err().is_expected());

        let ints = x.to_dtype(DType::I32).unwrap();
        assert!(rt.conv2d(&ints, &w, None, &ConvParams::default()).unwrap_err().is_expected());
    }

    #[test]
    fn test_conv1d_dilation() {
        let rt = NdRuntime::default();
        let x = ramp(&[1, 1, 5]);
        let w = NdTensor::from_vec(DType::F64, &[1, 1, 2], vec![1.0, 1.0]).unwrap();
        let params = ConvParams {
            dilation: [2],
            ..ConvParams::default()
        };
        let out = rt.conv1d(&x, &w, None, &params).unwrap();
        assert_eq!(out.shape(), &[1, 1, 3]);
        assert_eq!(flat(&out), vec![2.0, 4.0, 6.0]);
    }
}
