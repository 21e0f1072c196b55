use super::{float_tensor, real_values};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::{Loss, NdTensor, Reduction, UnaryOp};

pub const TARGET: Target = Target {
    name: "loss",
    summary: "l1, mse, huber, smooth_l1 and binary cross entropy under every reduction",
    min_size: 5,
    run,
};

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let selector = case.cursor.select(5);
    let reduction = Reduction::ALL[case.cursor.select(Reduction::ALL.len())];
    // usually in (0, 1], sometimes zero or negative for the argument checks
    let width = if case.cursor.select(8) == 0 {
        case.cursor.int_in(-1, 0, 0) as f64
    } else {
        case.cursor.unit_f64(0.5) * 0.9 + 0.1
    };
    let input = float_tensor(case)?;
    let target = match case.tensor_if(2)? {
        Some(t) => t,
        None => {
            // the input's own values, so the loss is zero
            let values = real_values(&input);
            NdTensor::from_vec(input.dtype(), input.shape(), values)?
        }
    };

    let rt = &*case.runtime;
    let (loss, input) = match selector {
        0 => (Loss::L1, input),
        1 => (Loss::Mse, input),
        2 => (Loss::Huber { delta: width }, input),
        3 => (Loss::SmoothL1 { beta: width }, input),
        // probabilities from logits, occasionally raw values for the range check
        _ if case.cursor.bool_or(true) => (Loss::BinaryCrossEntropy, rt.unary(UnaryOp::Sigmoid, &input)?),
        _ => (Loss::BinaryCrossEntropy, input),
    };

    let out = rt.loss(loss, &input, &target, reduction)?;
    if reduction != Reduction::None {
        case.check("reduced loss is a scalar", out.shape().is_empty());
    }
    // cross entropy goes negative once targets leave [0, 1]
    let bounded_target = real_values(&target).iter().all(|y| (0.0..=1.0).contains(y));
    if loss != Loss::BinaryCrossEntropy || bounded_target {
        case.check(
            "loss is non-negative",
            real_values(&out).iter().all(|v| v.is_nan() || *v >= 0.0),
        );
    }
    Ok(())
}
