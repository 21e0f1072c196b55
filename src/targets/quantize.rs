use super::{float_tensor, real_values};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::models::DType;

pub const TARGET: Target = Target {
    name: "quantize",
    summary: "quantize_per_tensor into u8/i8/i32 and dequantize back",
    min_size: 4,
    run,
};

const QDTYPES: [DType; 3] = [DType::U8, DType::I8, DType::I32];

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let x = float_tensor(case)?;
    let qdtype = QDTYPES[case.cursor.select(QDTYPES.len())];
    let scale = if case.cursor.select(8) == 0 {
        case.cursor.f64_or(0.0)
    } else {
        case.cursor.unit_f64(0.1) + 1e-3
    };
    let zero_point = case.cursor.int_in(-130, 260, 0);

    let q = case.runtime.quantize_per_tensor(&x, scale, zero_point, qdtype)?;
    let restored = case.runtime.dequantize(&q)?;
    case.check("dequantize keeps shape", restored.shape() == x.shape());

    let (lo, hi) = match qdtype {
        DType::U8 => (u8::MIN as f64, u8::MAX as f64),
        DType::I8 => (i8::MIN as f64, i8::MAX as f64),
        _ => (i32::MIN as f64, i32::MAX as f64),
    };
    let min_repr = (lo - zero_point as f64) * scale;
    let max_repr = (hi - zero_point as f64) * scale;
    let within_half_step = real_values(&x)
        .iter()
        .zip(real_values(&restored))
        .filter(|(v, _)| v.is_finite() && (min_repr..=max_repr).contains(*v))
        .all(|(v, r)| (v - r).abs() <= scale * 0.5 + 1e-5 * v.abs().max(1.0));
    case.check("dequantized values within half a step", within_half_step);
    Ok(())
}
