use super::{float_tensor, tolerate};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::NdTensor;

pub const TARGET: Target = Target {
    name: "linalg",
    summary: "matmul, trace, det, inv, solve and matrix_power",
    min_size: 4,
    run,
};

/// Reuses the leading `n * n` elements of `x` as one square matrix,
/// `n = floor(sqrt(numel))`.
fn leading_square(x: &NdTensor) -> Outcome<NdTensor> {
    let values = x.real_array("leading_square")?;
    let n = values.len().isqrt();
    let square: Vec<f64> = values.iter().take(n * n).copied().collect();
    NdTensor::from_vec(x.dtype(), &[n, n], square)
}

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let op = case.cursor.select(6);
    if op == 0 {
        let a = case.tensor()?;
        let b = case.tensor_if(2)?.unwrap_or_else(|| a.clone());
        let out = case.runtime.matmul(&a, &b)?;
        if a.ndim() >= 2 && b.ndim() >= 2 {
            let rows = a.shape()[a.ndim() - 2];
            let cols = b.shape()[b.ndim() - 1];
            case.check("matmul output rows", out.shape()[out.ndim() - 2] == rows);
            case.check("matmul output cols", out.shape()[out.ndim() - 1] == cols);
        }
        return Ok(());
    }

    let mut a = float_tensor(case)?;
    if case.cursor.bool_or(true) {
        a = leading_square(&a)?;
    }
    let rt = &*case.runtime;

    match op {
        1 => {
            rt.trace(&a)?;
        }
        2 => {
            let det = rt.det(&a)?;
            case.check("det drops the matrix dims", det.ndim() + 2 == a.ndim());
        }
        3 => {
            let inv = rt.inv(&a)?;
            case.check("inverse keeps shape", inv.shape() == a.shape());
            if let Some(product) = tolerate(rt.matmul(&a, &inv))? {
                case.check("a @ inv(a) is square", product.shape() == a.shape());
            }
        }
        4 => {
            let b = case.tensor_if(2)?.unwrap_or_else(|| a.clone());
            let b = b.to_dtype(a.dtype())?;
            let x = case.runtime.solve(&a, &b)?;
            case.check("solution has the shape of b", x.shape() == b.shape());
        }
        _ => {
            let n = case.cursor.int_in(-3, 6, 2);
            let out = rt.matrix_power(&a, n)?;
            case.check("matrix_power keeps shape", out.shape() == a.shape());
            if n == 1 {
                case.agree("first power is the input", &out, &a, 0.0, 0.0);
            }
        }
    }
    Ok(())
}
