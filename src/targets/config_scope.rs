use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::models::DType;
use crate::runtime::{ReduceOp, RuntimeConfig, UnaryOp};

pub const TARGET: Target = Target {
    name: "config_scope",
    summary: "set, check and restore thread count, determinism and default dtype",
    min_size: 5,
    run,
};

/// `I32` is in the list so the default-dtype check gets exercised.
const DEFAULT_FLOATS: [DType; 5] = [DType::F32, DType::F64, DType::F16, DType::BF16, DType::I32];

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let threads = case.cursor.int_in(0, 8, 1) as usize;
    let deterministic = case.cursor.bool_or(false);
    let default_float = DEFAULT_FLOATS[case.cursor.select(DEFAULT_FLOATS.len())];
    let x = case.tensor()?;

    let before = *case.runtime.config();
    let baseline = case.runtime.reduce(ReduceOp::Sum, &x, None, false)?;

    let config = RuntimeConfig::default()
        .with_num_threads(threads)
        .with_deterministic(deterministic)
        .with_default_float(default_float);
    let scoped = case.runtime.with_config(config, |rt| {
        let seen = *rt.config();
        let sum = rt.reduce(ReduceOp::Sum, &x, None, false)?;
        let sigmoid = rt.unary(UnaryOp::Sigmoid, &x)?;
        Ok((seen, sum, sigmoid))
    });
    case.check("configuration restored", *case.runtime.config() == before);
    let (seen, sum, sigmoid) = scoped?;

    case.check("scoped configuration applied", seen == config);
    if !x.is_floating_point() && !x.dtype().is_complex() {
        case.check("int inputs promote to the default float", sigmoid.dtype() == default_float);
    }
    if deterministic || threads == 1 {
        case.agree("sequential sums agree", &sum, &baseline, 0.0, 0.0);
    }
    Ok(())
}
