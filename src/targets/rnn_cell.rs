use super::real_values;
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::models::DType;
use crate::runtime::{CellWeights, NdTensor};

pub const TARGET: Target = Target {
    name: "rnn_cell",
    summary: "rnn_tanh, rnn_relu, gru and lstm cells",
    min_size: 6,
    run,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Tanh,
    Relu,
    Gru,
    Lstm,
}

impl Cell {
    const ALL: [Cell; 4] = [Cell::Tanh, Cell::Relu, Cell::Gru, Cell::Lstm];

    fn gates(&self) -> usize {
        match self {
            Cell::Tanh | Cell::Relu => 1,
            Cell::Gru => 3,
            Cell::Lstm => 4,
        }
    }
}

/// A float tensor of `shape` filled from consecutive `f32`s in the input,
/// zeros once it runs out.
fn filled(case: &mut Case<'_>, dtype: DType, shape: &[usize]) -> Outcome<NdTensor> {
    let n: usize = shape.iter().product();
    let values = (0..n)
        .map(|_| case.cursor.read_f32().map(f64::from).unwrap_or(0.0))
        .collect();
    NdTensor::from_vec(dtype, shape, values)
}

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let dtype = case.runtime.config().default_float;
    let cell = Cell::ALL[case.cursor.select(Cell::ALL.len())];
    let input = case.tensor()?.to_dtype(dtype)?;
    let features = input.shape().last().copied().unwrap_or(1);
    let batch = (input.ndim() == 2).then(|| input.shape()[0]);
    let hidden = case.cursor.int_in(1, 4, 2) as usize;
    let rows = cell.gates() * hidden;

    // usually consistent weights, sometimes whatever the input decodes to
    let decoded = case.cursor.select(4) == 0;
    let w_ih = match decoded.then(|| case.tensor_if(2)).transpose()?.flatten() {
        Some(w) => w.to_dtype(dtype)?,
        None => filled(case, dtype, &[rows, features])?,
    };
    let w_hh = match decoded.then(|| case.tensor_if(2)).transpose()?.flatten() {
        Some(w) => w.to_dtype(dtype)?,
        None => filled(case, dtype, &[rows, hidden])?,
    };
    let (b_ih, b_hh) = if case.cursor.bool_or(false) {
        (Some(filled(case, dtype, &[rows])?), Some(filled(case, dtype, &[rows])?))
    } else {
        (None, None)
    };
    let state_shape: Vec<usize> = batch.into_iter().chain([hidden]).collect();
    let hx = if case.cursor.bool_or(false) {
        Some(filled(case, dtype, &state_shape)?)
    } else {
        None
    };
    let cx = match (&hx, cell) {
        (Some(_), Cell::Lstm) => Some(filled(case, dtype, &state_shape)?),
        _ => None,
    };

    let weights = CellWeights {
        w_ih: &w_ih,
        w_hh: &w_hh,
        b_ih: b_ih.as_ref(),
        b_hh: b_hh.as_ref(),
    };
    let rt = &*case.runtime;
    let bounded = |t: &NdTensor| real_values(t).iter().all(|v| v.is_nan() || v.abs() <= 1.0);

    match cell {
        Cell::Tanh => {
            let h = rt.rnn_tanh_cell(&input, hx.as_ref(), &weights)?;
            case.check("tanh cell output in [-1, 1]", bounded(&h));
        }
        Cell::Relu => {
            let h = rt.rnn_relu_cell(&input, hx.as_ref(), &weights)?;
            case.check(
                "relu cell output is non-negative",
                real_values(&h).iter().all(|v| v.is_nan() || *v >= 0.0),
            );
        }
        Cell::Gru => {
            let h = rt.gru_cell(&input, hx.as_ref(), &weights)?;
            if hx.is_none() {
                case.check("gru from a zero state stays in [-1, 1]", bounded(&h));
            }
        }
        Cell::Lstm => {
            let state = hx.as_ref().zip(cx.as_ref());
            let (h, c) = rt.lstm_cell(&input, state, &weights)?;
            case.check("lstm h and c agree in shape", h.shape() == c.shape());
            case.check("lstm output in [-1, 1]", bounded(&h));
        }
    }
    Ok(())
}
