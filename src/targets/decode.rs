use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::runtime::NdTensor;

pub const TARGET: Target = Target {
    name: "decode",
    summary: "decode tensors until the input runs out and round-trip them through the runtime",
    min_size: 2,
    run,
};

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let limits = *case.limits();
    loop {
        let before = case.cursor.offset();
        let payload = case.payload()?;
        case.check("cursor only moves forward", case.cursor.offset() > before);
        case.check("payload length matches shape and dtype", payload.is_consistent());
        case.check(
            "rank within limits",
            (limits.min_rank as usize..=limits.max_rank as usize).contains(&payload.rank()),
        );
        if limits.min_dim <= limits.max_dim && limits.dim_span().is_some() {
            case.check(
                "dims within limits",
                payload.shape.iter().all(|d| (limits.min_dim..=limits.max_dim).contains(d)),
            );
        }

        let tensor = NdTensor::from_payload(&payload)?;
        let again = NdTensor::from_payload(&tensor.to_payload())?;
        case.agree("payload round trip", &tensor, &again, 0.0, 0.0);

        if case.cursor.remaining() < 2 {
            return Ok(());
        }
    }
}
