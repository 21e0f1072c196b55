//! One-dimensional discrete Fourier transforms along a single dim.
//!
//! Direct O(n^2) evaluation; lanes stay short under the decode limits.

use std::f64::consts::PI;

use ndarray::{ArrayD, ArrayView1, ArrayViewMut1, Axis, Zip};
use num_complex::Complex64;

use super::tensor::Storage;
use super::{wrap_dim, NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};
use crate::models::DType;

/// Which direction carries the `1/n` scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FftNorm {
    /// No scaling forward, `1/n` on the inverse.
    #[default]
    Backward,
    /// `1/sqrt(n)` both ways.
    Ortho,
    /// `1/n` forward, none on the inverse.
    Forward,
}

impl FftNorm {
    pub const ALL: [FftNorm; 3] = [FftNorm::Backward, FftNorm::Ortho, FftNorm::Forward];

    fn scale(&self, n: usize, inverse: bool) -> f64 {
        let n = n as f64;
        match (self, inverse) {
            (FftNorm::Ortho, _) => 1.0 / n.sqrt(),
            (FftNorm::Backward, false) | (FftNorm::Forward, true) => 1.0,
            (FftNorm::Backward, true) | (FftNorm::Forward, false) => 1.0 / n,
        }
    }
}

/// Complex dtype a transform of `dtype` computes in.
fn complex_dtype(op: &'static str, dtype: DType, default_float: DType) -> Outcome<DType> {
    match dtype {
        DType::C64 | DType::C128 => Ok(dtype),
        DType::F64 => Ok(DType::C128),
        DType::F32 => Ok(DType::C64),
        DType::F16 | DType::BF16 => Err(OpError::unsupported(op, dtype)),
        _ => complex_dtype(op, default_float, default_float),
    }
}

fn real_dtype(complex: DType) -> DType {
    if complex == DType::C128 { DType::F64 } else { DType::F32 }
}

fn signal_len(op: &'static str, n: Option<i64>, len: usize) -> Outcome<usize> {
    let n = n.unwrap_or(len as i64);
    if n < 1 {
        return Err(OpError::invalid(op, format!("Invalid number of data points ({n}) specified")));
    }
    Ok(n as usize)
}

/// Element `i` of `lane`, zero past its end.
fn padded(lane: &ArrayView1<'_, Complex64>, i: usize) -> Complex64 {
    lane.get(i).copied().unwrap_or_default()
}

/// `sum_j x[j] * exp(sign * 2 pi i j k / n)` for `k` in `0..out.len()`.
fn dft(input: &[Complex64], n: usize, sign: f64, scale: f64, mut out: ArrayViewMut1<'_, Complex64>) {
    for (k, slot) in out.iter_mut().enumerate() {
        let mut acc = Complex64::new(0.0, 0.0);
        for (j, &x) in input.iter().enumerate() {
            // reduce j * k first so the angle stays small
            let phase = ((j * k) % n) as f64;
            acc += x * Complex64::from_polar(1.0, sign * 2.0 * PI * phase / n as f64);
        }
        *slot = acc * scale;
    }
}

/// Maps every lane along `axis` into a lane of length `out_len`.
fn map_lanes<T: Clone + Default>(
    x: &ArrayD<Complex64>,
    axis: usize,
    out_len: usize,
    mut f: impl FnMut(ArrayView1<'_, Complex64>, ArrayViewMut1<'_, T>),
) -> ArrayD<T> {
    let mut shape = x.shape().to_vec();
    shape[axis] = out_len;
    let mut out = ArrayD::<T>::default(shape);
    Zip::from(x.lanes(Axis(axis)))
        .and(out.lanes_mut(Axis(axis)))
        .for_each(|src, dst| f(src, dst));
    out
}

impl NdRuntime {
    fn fft_input(&self, op: &'static str, x: &NdTensor) -> Outcome<(DType, ArrayD<Complex64>)> {
        let dtype = complex_dtype(op, x.dtype(), self.config().default_float)?;
        let values = x.to_dtype(dtype)?;
        match values.into_storage() {
            Storage::Complex(a) => Ok((dtype, a)),
            _ => Err(OpError::Unexpected(format!("{op}: complex cast produced real storage"))),
        }
    }

    fn c2c(&self, op: &'static str, x: &NdTensor, n: Option<i64>, dim: i64, norm: FftNorm, inverse: bool) -> Outcome<NdTensor> {
        let axis = wrap_dim(op, dim, x.ndim())?;
        if x.ndim() == 0 {
            return Err(OpError::invalid(op, "expected a tensor with at least one dimension"));
        }
        let (dtype, a) = self.fft_input(op, x)?;
        let n = signal_len(op, n, a.shape()[axis])?;
        let sign = if inverse { 1.0 } else { -1.0 };
        let scale = norm.scale(n, inverse);
        let out = map_lanes(&a, axis, n, |src, dst| {
            let lane: Vec<Complex64> = (0..n).map(|i| padded(&src, i)).collect();
            dft(&lane, n, sign, scale, dst);
        });
        NdTensor::complex(dtype, out)
    }

    /// Complex-to-complex forward transform along `dim`, trimming or
    /// zero-padding the signal to `n` points.
    pub fn fft(&self, x: &NdTensor, n: Option<i64>, dim: i64, norm: FftNorm) -> Outcome<NdTensor> {
        self.c2c("fft", x, n, dim, norm, false)
    }

    pub fn ifft(&self, x: &NdTensor, n: Option<i64>, dim: i64, norm: FftNorm) -> Outcome<NdTensor> {
        self.c2c("ifft", x, n, dim, norm, true)
    }

    /// Real-to-complex transform keeping the `n / 2 + 1` non-redundant
    /// frequencies.
    pub fn rfft(&self, x: &NdTensor, n: Option<i64>, dim: i64, norm: FftNorm) -> Outcome<NdTensor> {
        let op = "rfft";
        if x.dtype().is_complex() {
            return Err(OpError::invalid(
                op,
                format!("rfft expects a real input tensor, but got {}", x.dtype()),
            ));
        }
        let axis = wrap_dim(op, dim, x.ndim())?;
        if x.ndim() == 0 {
            return Err(OpError::invalid(op, "expected a tensor with at least one dimension"));
        }
        let (dtype, a) = self.fft_input(op, x)?;
        let n = signal_len(op, n, a.shape()[axis])?;
        let scale = norm.scale(n, false);
        let out = map_lanes(&a, axis, n / 2 + 1, |src, dst| {
            let lane: Vec<Complex64> = (0..n).map(|i| padded(&src, i)).collect();
            dft(&lane, n, -1.0, scale, dst);
        });
        NdTensor::complex(dtype, out)
    }

    /// Complex-to-real inverse of [`NdRuntime::rfft`]. `n` defaults to
    /// `2 * (m - 1)` for an input lane of `m` frequencies. The imaginary
    /// parts of the zero and Nyquist bins are ignored.
    pub fn irfft(&self, x: &NdTensor, n: Option<i64>, dim: i64, norm: FftNorm) -> Outcome<NdTensor> {
        let op = "irfft";
        let axis = wrap_dim(op, dim, x.ndim())?;
        if x.ndim() == 0 {
            return Err(OpError::invalid(op, "expected a tensor with at least one dimension"));
        }
        let (dtype, a) = self.fft_input(op, x)?;
        let m = a.shape()[axis];
        let n = signal_len(op, n.or(Some(2 * (m as i64 - 1))), m)?;
        let half = n / 2 + 1;
        let scale = norm.scale(n, true);

        let out = map_lanes(&a, axis, n, |src, mut dst| {
            let mut spectrum = vec![Complex64::new(0.0, 0.0); n];
            for k in 0..half {
                let mut bin = padded(&src, k);
                if k == 0 || 2 * k == n {
                    bin.im = 0.0;
                }
                spectrum[k] = bin;
                if k > 0 && k < n - k {
                    spectrum[n - k] = bin.conj();
                }
            }
            let mut full = ndarray::Array1::<Complex64>::zeros(n);
            dft(&spectrum, n, 1.0, scale, full.view_mut());
            for (slot, v) in dst.iter_mut().zip(full.iter()) {
                *slot = v.re;
            }
        });
        NdTensor::float(real_dtype(dtype), out)
    }
}
