use crate::error::Outcome;
use crate::harness::{Case, Target};
use crate::models::DType;
use crate::runtime::{ConvParams, NdTensor};

pub const TARGET: Target = Target {
    name: "conv",
    summary: "conv1d and conv2d with stride, padding, dilation and groups variants",
    min_size: 6,
    run,
};

/// All-ones kernel of size 1 matching the input's channel count, for inputs
/// that run out before a weight can be decoded.
fn pointwise_weight(input: &NdTensor, dtype: DType) -> Outcome<NdTensor> {
    let shape: Vec<usize> = match input.shape() {
        [_, c, _, _] => vec![1, *c, 1, 1],
        [.., c, _] => vec![1, *c, 1],
        _ => vec![1, 1, 1],
    };
    let n = shape.iter().product();
    NdTensor::from_vec(dtype, &shape, vec![1.0; n])
}

fn run(case: &mut Case<'_>) -> Outcome<()> {
    let float = case.runtime.config().default_float;
    let input = case.tensor()?.to_dtype(float)?;
    let weight = match case.tensor_if(2)? {
        Some(w) => w.to_dtype(float)?,
        None => pointwise_weight(&input, float)?,
    };
    let bias = if case.cursor.bool_or(false) {
        match case.tensor_if(2)? {
            Some(b) => Some(b.to_dtype(float)?),
            None => None,
        }
    } else {
        None
    };

    // zero and negative values reach the parameter checks
    let mut stride = case.cursor.int_in(0, 3, 1);
    let mut padding = case.cursor.int_in(-1, 3, 0);
    let mut dilation = case.cursor.int_in(0, 3, 1);
    let groups = case.cursor.int_in(0, 3, 1);
    let one_d = weight.ndim() == 3;

    let out = if one_d {
        let params = ConvParams::<1> {
            stride: [stride],
            padding: [padding],
            dilation: [dilation],
            groups,
        };
        case.runtime.conv1d(&input, &weight, bias.as_ref(), &params)?
    } else {
        let mut params = ConvParams::<2> {
            stride: [stride; 2],
            padding: [padding; 2],
            dilation: [dilation; 2],
            groups,
        };
        if case.cursor.bool_or(false) {
            stride = case.cursor.int_in(0, 3, 1);
            padding = case.cursor.int_in(-1, 3, 0);
            dilation = case.cursor.int_in(0, 3, 1);
            params.stride[1] = stride;
            params.padding[1] = padding;
            params.dilation[1] = dilation;
        }
        case.runtime.conv2d(&input, &weight, bias.as_ref(), &params)?
    };

    let channel_axis = out.ndim() - if one_d { 2 } else { 3 };
    case.check("conv keeps dtype", out.dtype() == input.dtype());
    case.check(
        "output channels match weight",
        out.shape()[channel_axis] == weight.shape()[0],
    );
    Ok(())
}
