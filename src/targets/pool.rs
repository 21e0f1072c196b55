use super::{float_tensor, real_values};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::PoolParams;

pub const TARGET: Target = Target {
    name: "pool",
    summary: "max_pool2d and avg_pool2d with kernel, stride, padding, dilation and ceil mode",
    min_size: 6,
    run,
};

fn run(case: &mut Case<'_>) -> Outcome<()> {
    // zero and oversized values reach the parameter checks
    let kernel = case.cursor.int_in(0, 4, 2);
    let mut params = PoolParams {
        kernel: [kernel; 2],
        stride: [case.cursor.int_in(0, 3, kernel); 2],
        padding: [case.cursor.int_in(-1, 2, 0); 2],
        dilation: [case.cursor.int_in(0, 2, 1); 2],
        ceil_mode: case.cursor.bool_or(false),
    };
    if case.cursor.bool_or(false) {
        params.kernel[1] = case.cursor.int_in(0, 4, kernel);
        params.stride[1] = case.cursor.int_in(0, 3, params.kernel[1]);
    }
    let x = float_tensor(case)?;
    let rt = &*case.runtime;

    if case.cursor.bool_or(true) {
        let (out, indices) = rt.max_pool2d(&x, &params)?;
        case.check("indices match values in shape", indices.shape() == out.shape());
        let values = real_values(&x);
        let picked = real_values(&indices);
        let plane = x.shape()[x.ndim() - 2] * x.shape()[x.ndim() - 1];
        case.check(
            "max indices stay inside one plane",
            picked.iter().all(|&i| i >= -1.0 && (i as i64) < plane as i64),
        );
        if values.iter().all(|v| !v.is_nan()) {
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            case.check(
                "pooled maxima are never below the input minimum",
                real_values(&out).iter().all(|&v| v >= lo || v == f64::NEG_INFINITY),
            );
        }
    } else {
        let count_include_pad = case.cursor.bool_or(true);
        let out = rt.avg_pool2d(&x, &params, count_include_pad)?;
        case.check("avg pool keeps dtype", out.dtype() == x.dtype());
        case.check("avg pool keeps rank", out.ndim() == x.ndim());
    }
    Ok(())
}
