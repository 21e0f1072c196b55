use super::{real_values, tolerate};
use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::{FftNorm, NdTensor};

pub const TARGET: Target = Target {
    name: "fft",
    summary: "fft/ifft and rfft/irfft round trips along one dim, every norm",
    min_size: 4,
    run,
};

/// Tolerances for comparing a round trip against its input.
fn round_trip_tolerance(x: &NdTensor) -> Option<(f64, f64)> {
    let values = real_values(x);
    if x.dtype().is_complex() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let peak = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if peak > 1e15 {
        return None;
    }
    let lane = x.shape().iter().copied().max().unwrap_or(1) as f64;
    Some((1e-3, 1e-4 * peak.max(1.0) * lane))
}

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let x = case.tensor()?;
    let ndim = x.ndim();
    let dim = case.cursor.dim_for(ndim).map_or(-1, |d| d as i64);
    let axis = dim.rem_euclid(ndim.max(1) as i64) as usize;
    let len = x.shape().get(axis).copied().unwrap_or(1) as i64;
    // n usually follows the lane, sometimes trims, pads or hits n < 1
    let n = if case.cursor.select(4) == 0 {
        Some(case.cursor.int_in(-1, 2 * len + 1, len))
    } else {
        None
    };
    let norm = FftNorm::ALL[case.cursor.select(FftNorm::ALL.len())];
    let rt = &*case.runtime;

    match case.cursor.select(3) {
        0 => {
            let spectrum = rt.fft(&x, n, dim, norm)?;
            case.check("fft output is complex", spectrum.dtype().is_complex());
            if n.is_none() {
                let back = rt.ifft(&spectrum, None, dim, norm)?;
                if let Some((rtol, atol)) = round_trip_tolerance(&x) {
                    let expected = x.to_dtype(back.dtype())?;
                    case.agree("ifft inverts fft", &back, &expected, rtol, atol);
                }
            }
        }
        1 => {
            let spectrum = rt.rfft(&x, n, dim, norm)?;
            let points = n.unwrap_or(len);
            case.check(
                "rfft keeps n / 2 + 1 frequencies",
                spectrum.shape().get(axis).copied() == Some(points as usize / 2 + 1),
            );
            if n.is_none() {
                if let Some(back) = tolerate(rt.irfft(&spectrum, Some(len), dim, norm))? {
                    if let Some((rtol, atol)) = round_trip_tolerance(&x) {
                        let expected = x.to_dtype(back.dtype())?;
                        case.agree("irfft inverts rfft", &back, &expected, rtol, atol);
                    }
                }
            }
        }
        _ => {
            let signal = rt.irfft(&x, n, dim, norm)?;
            case.check("irfft output is real", signal.is_floating_point());
        }
    }
    Ok(())
}
