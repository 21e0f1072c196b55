//! Fuzz-input builders. Rank selectors below assume the default limits,
//! where the selector byte equals the rank for ranks 0..=4.

use tensorfuzz::{DType, SUPPORTED_DTYPES};

pub fn dtype_selector(dtype: DType) -> u8 {
    SUPPORTED_DTYPES.iter().position(|&d| d == dtype).unwrap() as u8
}

/// Header (dtype and rank selectors plus dims) followed by raw element bytes.
pub fn tensor_input(dtype: DType, dims: &[i64], data: &[u8]) -> Vec<u8> {
    let mut input = vec![dtype_selector(dtype), dims.len() as u8];
    for &d in dims {
        input.extend_from_slice(&d.to_le_bytes());
    }
    input.extend_from_slice(data);
    input
}

pub fn f32_input(dims: &[i64], values: &[f32]) -> Vec<u8> {
    tensor_input(DType::F32, dims, bytemuck::cast_slice(values))
}

pub fn f64_input(dims: &[i64], values: &[f64]) -> Vec<u8> {
    tensor_input(DType::F64, dims, bytemuck::cast_slice(values))
}

pub fn i32_input(dims: &[i64], values: &[i32]) -> Vec<u8> {
    tensor_input(DType::I32, dims, bytemuck::cast_slice(values))
}

pub fn make_f32_data(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32 * 0.5 - 1.0).collect()
}

/// Concatenates pieces of an input.
pub fn join(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}
