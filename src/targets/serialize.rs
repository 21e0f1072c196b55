use super::tolerate;
use crate::error::Outcome;
use crate::harness::{Case, Target};

pub const TARGET: Target = Target {
    name: "serialize",
    summary: "save/load round trip, and loading whatever bytes follow",
    min_size: 3,
    run,
};

fn run(case: &mut Case<'_>) -> Outcome<()> {
    if case.cursor.select(2) == 0 {
        let x = case.tensor()?;
        let bytes = case.runtime.save(&x)?;
        let back = case.runtime.load(&bytes)?;
        case.check("load keeps dtype", back.dtype() == x.dtype());
        case.agree("save/load round trip", &back, &x, 0.0, 0.0);
        return Ok(());
    }

    let raw = case.cursor.take_rest();
    let loaded = case.runtime.load(raw)?;
    if let Some(bytes) = tolerate(case.runtime.save(&loaded))? {
        let again = case.runtime.load(&bytes)?;
        case.agree("re-saved archive loads the same", &again, &loaded, 0.0, 0.0);
    }
    Ok(())
}
