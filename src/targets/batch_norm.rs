use super::{float_tensor, real_values};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::{BatchNormParams, NdTensor, ReduceOp, RunningStats};

pub const TARGET: Target = Target {
    name: "batch_norm",
    summary: "batch_norm in training and eval mode with optional affine and running stats",
    min_size: 6,
    run,
};

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let training = case.cursor.bool_or(true);
    let affine = case.cursor.bool_or(false);
    let track_running_stats = case.cursor.bool_or(true);
    let momentum = case.cursor.unit_f64(0.1);
    // eps in (0, 0.1], or a raw value now and then
    let eps = if case.cursor.select(8) == 0 {
        case.cursor.f64_or(1e-5)
    } else {
        case.cursor.unit_f64(1e-5) * 0.1 + 1e-10
    };
    let x = float_tensor(case)?;
    let channels = x.shape().get(1).copied().unwrap_or(1);

    let (weight, bias) = if affine {
        let weight = NdTensor::from_vec(x.dtype(), &[channels], vec![1.0; channels])?;
        let bias = match case.tensor_if(2)? {
            Some(b) => b.to_dtype(x.dtype())?,
            None => NdTensor::from_vec(x.dtype(), &[channels], vec![0.0; channels])?,
        };
        (Some(weight), Some(bias))
    } else {
        (None, None)
    };
    let mut running = if track_running_stats {
        Some(RunningStats::new(x.dtype(), channels)?)
    } else {
        None
    };
    let params = BatchNormParams {
        training,
        momentum,
        eps,
    };

    let out = case
        .runtime
        .batch_norm(&x, weight.as_ref(), bias.as_ref(), running.as_mut(), &params)?;
    case.check("batch norm keeps shape", out.shape() == x.shape());

    let values = real_values(&x);
    let tame = values.iter().all(|v| v.abs() < 1e4) && eps > 0.0 && eps <= 0.1;
    if training && !affine && tame && x.numel() > 0 {
        // every channel of the output has mean close to zero
        let rt = &*case.runtime;
        let moved = rt.transpose(&out, 0, 1)?;
        let flat = rt.reshape(&moved, &[channels as i64, -1])?;
        let means = rt.reduce(ReduceOp::Mean, &flat.to_dtype(crate::models::DType::F64)?, Some(1), false)?;
        case.check(
            "normalized channels are centred",
            real_values(&means).iter().all(|m| m.abs() < 0.1),
        );
    }
    Ok(())
}
