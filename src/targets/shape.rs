use super::tolerate;
use crate::error::Outcome;
use crate::harness::{Case, Target};

pub const TARGET: Target = Target {
    name: "shape",
    summary: "reshape, flatten, transpose, squeeze, unsqueeze and cat",
    min_size: 3,
    run,
};

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let x = case.tensor()?;
    let rt = &*case.runtime;

    match case.cursor.select(6) {
        0 => {
            let cols = case.cursor.int_in(-1, 6, 1);
            let out = rt.reshape(&x, &[-1, cols])?;
            case.check("reshape keeps numel", out.numel() == x.numel());
        }
        1 => {
            let out = rt.flatten(&x)?;
            case.check("flatten is 1-D", out.ndim() == 1);
            case.check("flatten keeps numel", out.numel() == x.numel());
        }
        2 => {
            let d0 = case.cursor.int_in(-5, 4, 0);
            let d1 = case.cursor.int_in(-5, 4, 0);
            let out = rt.transpose(&x, d0, d1)?;
            case.check("transpose keeps numel", out.numel() == x.numel());
            if let Some(back) = tolerate(rt.transpose(&out, d0, d1))? {
                case.agree("double transpose", &back, &x, 0.0, 0.0);
            }
        }
        3 => {
            let dim = if case.cursor.bool_or(false) {
                Some(case.cursor.int_in(-5, 4, 0))
            } else {
                None
            };
            let out = rt.squeeze(&x, dim)?;
            case.check("squeeze keeps numel", out.numel() == x.numel());
            case.check("squeeze never adds dims", out.ndim() <= x.ndim());
        }
        4 => {
            let dim = case.cursor.int_in(-6, 5, 0);
            let out = rt.unsqueeze(&x, dim)?;
            case.check("unsqueeze adds one dim", out.ndim() == x.ndim() + 1);
            if let Some(back) = tolerate(rt.squeeze(&out, Some(dim)))? {
                case.agree("squeeze undoes unsqueeze", &back, &x, 0.0, 0.0);
            }
        }
        _ => {
            let y = case.tensor_if(2)?.unwrap_or_else(|| x.clone());
            let dim = case.cursor.int_in(-4, 3, 0);
            let out = case.runtime.cat(&[x.clone(), y.clone()], dim)?;
            case.check("cat keeps every element", out.numel() == x.numel() + y.numel());
        }
    }
    Ok(())
}
