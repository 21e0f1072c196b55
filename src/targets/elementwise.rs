use super::{inject, real_values, special_value, tolerate};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::{BinaryOp, UnaryOp};

pub const UNARY: Target = Target {
    name: "unary",
    summary: "one of 14 unary ops, out-of-place against in-place",
    min_size: 3,
    run: run_unary,
};

pub const BINARY: Target = Target {
    name: "binary",
    summary: "broadcasting binary ops with NaN/Inf injection",
    min_size: 4,
    run: run_binary,
};

fn run_unary(case: &mut Case<'_>) -> Outcome<()> {
    let x = case.tensor()?;
    let op = UnaryOp::ALL[case.cursor.select(UnaryOp::ALL.len())];
    tracing::trace!(op = op.name(), dtype = %x.dtype(), shape = ?x.shape(), "unary");

    let out = case.runtime.unary(op, &x)?;
    case.check("unary preserves shape", out.shape() == x.shape());
    if op == UnaryOp::Abs {
        case.check(
            "abs is non-negative",
            real_values(&out).iter().all(|v| v.is_nan() || *v >= 0.0),
        );
    }

    let mut inplace = x.clone();
    if tolerate(case.runtime.unary_(op, &mut inplace))?.is_some() {
        case.agree("in-place unary", &inplace, &out, 0.0, 0.0);
    }
    Ok(())
}

fn run_binary(case: &mut Case<'_>) -> Outcome<()> {
    let mut a = case.tensor()?;
    let b = case.tensor_if(2)?.unwrap_or_else(|| a.clone());
    let op = BinaryOp::ALL[case.cursor.select(BinaryOp::ALL.len())];
    if let Some(value) = special_value(case.cursor.select(4)) {
        let index = case.cursor.read_u64().unwrap_or(0);
        inject(&mut a, index, value);
    }
    tracing::trace!(op = op.name(), lhs = ?a.shape(), rhs = ?b.shape(), "binary");

    let out = case.runtime.binary(op, &a, &b)?;
    case.check(
        "broadcast rank",
        out.ndim() == a.ndim().max(b.ndim()),
    );

    if matches!(
        op,
        BinaryOp::Add | BinaryOp::Mul | BinaryOp::Maximum | BinaryOp::Minimum
    ) {
        if let Some(swapped) = tolerate(case.runtime.binary(op, &b, &a))? {
            case.agree("commutative binary", &out, &swapped, 0.0, 0.0);
        }
    }

    let mut lhs = a.clone();
    if tolerate(case.runtime.binary_(op, &mut lhs, &b))?.is_some() {
        // the in-place result is narrowed into lhs's dtype
        let expected = out.to_dtype(lhs.dtype())?;
        case.agree("in-place binary", &lhs, &expected, 0.0, 0.0);
    }
    Ok(())
}
