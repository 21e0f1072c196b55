use super::{float_tensor, inject, real_values, tolerate};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::models::DType;
use crate::runtime::{Interpolation, NdTensor, NormOrd, ReduceOp};

pub const REDUCE: Target = Target {
    name: "reduce",
    summary: "sum/mean/prod/max/min/norm/softmax over all elements or one dim",
    min_size: 3,
    run: run_reduce,
};

pub const NANQUANTILE: Target = Target {
    name: "nanquantile",
    summary: "quantile and nanquantile with NaN injection and every interpolation",
    min_size: 4,
    run: run_nanquantile,
};

/// Reads an optional reduction dim, sometimes negative.
fn read_dim(case: &mut Case<'_>, ndim: usize) -> Option<i64> {
    if !case.cursor.bool_or(false) {
        return None;
    }
    let dim = case.cursor.dim_for(ndim.max(1))? as i64;
    if case.cursor.bool_or(false) {
        Some(dim - ndim.max(1) as i64)
    } else {
        Some(dim)
    }
}

fn run_reduce(case: &mut Case<'_>) -> Outcome<()> {
    let x = case.tensor()?;
    let selector = case.cursor.select(ReduceOp::ALL.len() + 4);
    let dim = read_dim(case, x.ndim());
    let keepdim = case.cursor.bool_or(false);

    let out = match selector {
        i if i < ReduceOp::ALL.len() => case.runtime.reduce(ReduceOp::ALL[i], &x, dim, keepdim)?,
        i if i == ReduceOp::ALL.len() + 3 => return run_softmax(case, &x, dim.unwrap_or(-1)),
        i => {
            let ord = [NormOrd::L1, NormOrd::L2, NormOrd::Inf][i - ReduceOp::ALL.len()];
            let out = case.runtime.norm(&x, ord, dim, keepdim)?;
            case.check(
                "norm is non-negative",
                real_values(&out).iter().all(|v| v.is_nan() || *v >= 0.0),
            );
            out
        }
    };

    if keepdim {
        case.check("keepdim keeps rank", out.ndim() == x.ndim());
    } else if dim.is_some() && x.ndim() > 0 {
        case.check("reduction drops one dim", out.ndim() + 1 == x.ndim());
    }
    Ok(())
}

fn run_softmax(case: &mut Case<'_>, x: &NdTensor, dim: i64) -> Outcome<()> {
    let x = if x.is_floating_point() {
        x.clone()
    } else {
        x.to_dtype(case.runtime.config().default_float)?
    };
    let out = case.runtime.softmax(&x, dim)?;
    case.check("softmax keeps shape", out.shape() == x.shape());

    let values = real_values(&x);
    if x.numel() > 0 && x.ndim() > 0 && values.iter().all(|v| v.abs() < 1e30) {
        let total = case
            .runtime
            .reduce(ReduceOp::Sum, &out.to_dtype(DType::F64)?, Some(dim), false)?;
        let lanes = real_values(&total);
        case.check(
            "softmax lanes sum to one",
            lanes.iter().all(|s| (s - 1.0).abs() < 1e-2),
        );
    }
    Ok(())
}

fn run_nanquantile(case: &mut Case<'_>) -> Outcome<()> {
    let mut x = float_tensor(case)?;
    for _ in 0..case.cursor.select(4) {
        let index = case.cursor.read_u64().unwrap_or(0);
        inject(&mut x, index, f64::NAN);
    }

    // an occasional raw q drives the range check
    let q = if case.cursor.select(8) == 0 {
        case.cursor.f64_or(1.5)
    } else {
        case.cursor.unit_f64(0.5)
    };
    let interpolation = Interpolation::ALL[case.cursor.select(Interpolation::ALL.len())];
    let dim = read_dim(case, x.ndim());
    let keepdim = case.cursor.bool_or(false);

    let out = case.runtime.quantile(&x, q, dim, keepdim, interpolation, true)?;

    let finite: Vec<f64> = real_values(&x).into_iter().filter(|v| !v.is_nan()).collect();
    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if finite.iter().all(|v| v.abs() < 1e300) {
        let slack = 1e-9 * lo.abs().max(hi.abs());
        case.check(
            "nanquantile lies within the data range",
            real_values(&out)
                .iter()
                .all(|v| v.is_nan() || (lo - slack <= *v && *v <= hi + slack)),
        );
    }

    if finite.len() == x.numel() {
        if let Some(plain) = tolerate(case.runtime.quantile(&x, q, dim, keepdim, interpolation, false))? {
            case.agree("quantile matches nanquantile without NaN", &out, &plain, 0.0, 0.0);
        }
    }
    Ok(())
}
