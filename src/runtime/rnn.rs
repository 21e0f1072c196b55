//! Single-step recurrent cells with torch weight layouts.

use ndarray::{s, Array1, Array2, ArrayD, Axis, Ix1, Ix2};

use super::tensor::Storage;
use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};
use crate::models::DType;

/// Weights of one cell. `w_ih` is `[gates * hidden, input]`, `w_hh` is
/// `[gates * hidden, hidden]` and both biases are `[gates * hidden]`.
#[derive(Debug, Clone, Copy)]
pub struct CellWeights<'a> {
    pub w_ih: &'a NdTensor,
    pub w_hh: &'a NdTensor,
    pub b_ih: Option<&'a NdTensor>,
    pub b_hh: Option<&'a NdTensor>,
}

/// Everything a cell needs, already checked and laid out as `[batch, _]`.
struct Prepared {
    dtype: DType,
    batched: bool,
    hidden: usize,
    /// `x W_ih^T + b_ih`, `[batch, gates * hidden]`
    gi: Array2<f64>,
    /// `h W_hh^T + b_hh`, `[batch, gates * hidden]`
    gh: Array2<f64>,
    h: Array2<f64>,
}

fn float2(op: &'static str, t: &NdTensor, what: &str) -> Outcome<Array2<f64>> {
    match t.storage() {
        Storage::Float(a) if a.ndim() == 2 => Ok(a.clone().into_dimensionality::<Ix2>()?),
        Storage::Float(a) => Err(OpError::invalid(op, format!("{what} must be 2-D, got {}-D", a.ndim()))),
        _ => Err(OpError::unsupported(op, t.dtype())),
    }
}

fn float1(op: &'static str, t: &NdTensor, len: usize, what: &str) -> Outcome<Array1<f64>> {
    match t.storage() {
        Storage::Float(a) if a.shape() == &[len] => Ok(a.clone().into_dimensionality::<Ix1>()?),
        Storage::Float(_) => Err(OpError::invalid(
            op,
            format!("{what} must have shape [{len}], got {:?}", t.shape()),
        )),
        _ => Err(OpError::unsupported(op, t.dtype())),
    }
}

/// Lifts an unbatched `[features]` operand to `[1, features]`.
fn batch_rows(op: &'static str, t: &NdTensor, batched: bool, what: &str) -> Outcome<Array2<f64>> {
    match t.storage() {
        Storage::Float(a) if !batched && a.ndim() == 1 => {
            Ok(a.clone().insert_axis(Axis(0)).into_dimensionality::<Ix2>()?)
        }
        Storage::Float(_) if batched => float2(op, t, what),
        Storage::Float(a) => Err(OpError::invalid(
            op,
            format!("{what} must be 1-D for unbatched input, got {}-D", a.ndim()),
        )),
        _ => Err(OpError::unsupported(op, t.dtype())),
    }
}

fn prepare(
    op: &'static str,
    gates: usize,
    input: &NdTensor,
    hx: Option<&NdTensor>,
    weights: &CellWeights<'_>,
) -> Outcome<Prepared> {
    let dtype = input.dtype();
    let operands = [Some(weights.w_ih), Some(weights.w_hh), weights.b_ih, weights.b_hh, hx];
    if operands.iter().flatten().any(|t| t.dtype() != dtype) {
        return Err(OpError::invalid(op, "all operands must have the same dtype"));
    }
    let batched = match input.ndim() {
        1 => false,
        2 => true,
        n => return Err(OpError::invalid(op, format!("expected input to be 1-D or 2-D, got {n}-D"))),
    };

    let x = batch_rows(op, input, batched, "input")?;
    let w_ih = float2(op, weights.w_ih, "weight_ih")?;
    let w_hh = float2(op, weights.w_hh, "weight_hh")?;
    let rows = w_ih.nrows();
    if rows == 0 || rows % gates != 0 {
        return Err(OpError::invalid(
            op,
            format!("weight_ih must have a multiple of {gates} rows, got {rows}"),
        ));
    }
    let hidden = rows / gates;
    if w_ih.ncols() != x.ncols() {
        return Err(OpError::shape_mismatch(op, input.shape(), weights.w_ih.shape()));
    }
    if w_hh.dim() != (rows, hidden) {
        return Err(OpError::shape_mismatch(op, weights.w_ih.shape(), weights.w_hh.shape()));
    }

    let h = match hx {
        Some(t) => batch_rows(op, t, batched, "hx")?,
        None => Array2::zeros((x.nrows(), hidden)),
    };
    if h.dim() != (x.nrows(), hidden) {
        return Err(OpError::invalid(
            op,
            format!("hidden state must be [{}, {hidden}], got {:?}", x.nrows(), h.dim()),
        ));
    }

    let mut gi = x.dot(&w_ih.t());
    let mut gh = h.dot(&w_hh.t());
    if let Some(b) = weights.b_ih {
        gi += &float1(op, b, rows, "bias_ih")?;
    }
    if let Some(b) = weights.b_hh {
        gh += &float1(op, b, rows, "bias_hh")?;
    }

    Ok(Prepared {
        dtype,
        batched,
        hidden,
        gi,
        gh,
        h,
    })
}

fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

fn finish(dtype: DType, batched: bool, out: Array2<f64>) -> Outcome<NdTensor> {
    let out: ArrayD<f64> = if batched {
        out.into_dyn()
    } else {
        out.index_axis_move(Axis(0), 0).into_dyn()
    };
    NdTensor::float(dtype, out)
}

impl NdRuntime {
    /// `h' = tanh(x W_ih^T + b_ih + h W_hh^T + b_hh)`
    pub fn rnn_tanh_cell(
        &self,
        input: &NdTensor,
        hx: Option<&NdTensor>,
        weights: &CellWeights<'_>,
    ) -> Outcome<NdTensor> {
        let p = prepare("rnn_tanh_cell", 1, input, hx, weights)?;
        finish(p.dtype, p.batched, (p.gi + p.gh).mapv(f64::tanh))
    }

    /// Same as [`NdRuntime::rnn_tanh_cell`] with a ReLU nonlinearity.
    pub fn rnn_relu_cell(
        &self,
        input: &NdTensor,
        hx: Option<&NdTensor>,
        weights: &CellWeights<'_>,
    ) -> Outcome<NdTensor> {
        let p = prepare("rnn_relu_cell", 1, input, hx, weights)?;
        finish(p.dtype, p.batched, (p.gi + p.gh).mapv(|v| v.max(0.0)))
    }

    /// Gates are stacked as reset, update, new.
    pub fn gru_cell(
        &self,
        input: &NdTensor,
        hx: Option<&NdTensor>,
        weights: &CellWeights<'_>,
    ) -> Outcome<NdTensor> {
        let p = prepare("gru_cell", 3, input, hx, weights)?;
        let hs = p.hidden;
        let r = (&p.gi.slice(s![.., 0..hs]) + &p.gh.slice(s![.., 0..hs])).mapv(sigmoid);
        let z = (&p.gi.slice(s![.., hs..2 * hs]) + &p.gh.slice(s![.., hs..2 * hs])).mapv(sigmoid);
        let n = (&p.gi.slice(s![.., 2 * hs..]) + &(&r * &p.gh.slice(s![.., 2 * hs..]))).mapv(f64::tanh);
        let h = (1.0 - &z) * &n + &z * &p.h;
        finish(p.dtype, p.batched, h)
    }

    /// Gates are stacked as input, forget, cell, output. Returns `(h', c')`.
    pub fn lstm_cell(
        &self,
        input: &NdTensor,
        hx: Option<(&NdTensor, &NdTensor)>,
        weights: &CellWeights<'_>,
    ) -> Outcome<(NdTensor, NdTensor)> {
        let op = "lstm_cell";
        let p = prepare(op, 4, input, hx.map(|(h, _)| h), weights)?;
        let c = match hx {
            Some((_, c)) => {
                if c.dtype() != p.dtype {
                    return Err(OpError::invalid(op, "all operands must have the same dtype"));
                }
                batch_rows(op, c, p.batched, "cx")?
            }
            None => Array2::zeros(p.h.dim()),
        };
        if c.dim() != p.h.dim() {
            return Err(OpError::invalid(
                op,
                format!("cell state must be {:?}, got {:?}", p.h.dim(), c.dim()),
            ));
        }

        let hs = p.hidden;
        let gates = &p.gi + &p.gh;
        let i = gates.slice(s![.., 0..hs]).mapv(sigmoid);
        let f = gates.slice(s![.., hs..2 * hs]).mapv(sigmoid);
        let g = gates.slice(s![.., 2 * hs..3 * hs]).mapv(f64::tanh);
        let o = gates.slice(s![.., 3 * hs..]).mapv(sigmoid);
        let c_next = &f * &c + &i * &g;
        let h_next = &o * &c_next.mapv(f64::tanh);
        Ok((
            finish(p.dtype, p.batched, h_next)?,
            finish(p.dtype, p.batched, c_next)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], values: Vec<f64>) -> NdTensor {
        NdTensor::from_vec(DType::F64, shape, values).unwrap()
    }

    fn flat(t: &NdTensor) -> Vec<f64> {
        t.float_array("t").unwrap().iter().copied().collect()
    }

    #[test]
    fn test_rnn_tanh_cell_unbatched() {
        let rt = NdRuntime::default();
        let x = t(&[2], vec![1.0, 2.0]);
        let w_ih = t(&[1, 2], vec![0.5, 0.25]);
        let w_hh = t(&[1, 1], vec![1.0]);
        let b = t(&[1], vec![-1.0]);
        let weights = CellWeights {
            w_ih: &w_ih,
            w_hh: &w_hh,
            b_ih: Some(&b),
            b_hh: None,
        };
        let h = rt.rnn_tanh_cell(&x, None, &weights).unwrap();
        assert_eq!(h.shape(), &[1]);
        assert_eq!(flat(&h), vec![0.0]);

        let relu = rt.rnn_relu_cell(&x, Some(&t(&[1], vec![2.0])), &weights).unwrap();
        assert_eq!(flat(&relu), vec![2.0]);
    }

    #[test]
    fn test_gru_cell_zero_weights_keeps_half() {
        let rt = NdRuntime::default();
        let x = t(&[1, 1], vec![3.0]);
        let h = t(&[1, 1], vec![0.8]);
        let w_ih = t(&[3, 1], vec![0.0; 3]);
        let w_hh = t(&[3, 1], vec![0.0; 3]);
        let weights = CellWeights {
            w_ih: &w_ih,
            w_hh: &w_hh,
            b_ih: None,
            b_hh: None,
        };
        // z = 0.5, n = 0: h' = 0.5 * h
        let out = rt.gru_cell(&x, Some(&h), &weights).unwrap();
        assert!((flat(&out)[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_lstm_cell_shapes() {
        let rt = NdRuntime::default();
        let x = t(&[3, 2], vec![0.1; 6]);
        let w_ih = t(&[8, 2], vec![0.1; 16]);
        let w_hh = t(&[8, 2], vec![0.1; 16]);
        let weights = CellWeights {
            w_ih: &w_ih,
            w_hh: &w_hh,
            b_ih: None,
            b_hh: None,
        };
        let (h, c) = rt.lstm_cell(&x, None, &weights).unwrap();
        assert_eq!(h.shape(), &[3, 2]);
        assert_eq!(c.shape(), &[3, 2]);
        for v in flat(&h) {
            assert!(v.abs() < 1.0);
        }
    }

    #[test]
    fn test_cell_rejects_mismatched_weights() {
        let rt = NdRuntime::default();
        let x = t(&[1, 2], vec![0.0; 2]);
        let w_ih = t(&[4, 3], vec![0.0; 12]);
        let w_hh = t(&[4, 4], vec![0.0; 16]);
        let weights = CellWeights {
            w_ih: &w_ih,
            w_hh: &w_hh,
            b_ih: None,
            b_hh: None,
        };
        assert!(rt.rnn_tanh_cell(&x, None, &weights).unwrap_err().is_expected());
        assert!(rt.gru_cell(&x, None, &weights).unwrap_err().is_expected());

        let ints = x.to_dtype(DType::I32).unwrap();
        assert!(rt.rnn_tanh_cell(&ints, None, &weights).unwrap_err().is_expected());
    }
}
