use std::panic::{self, AssertUnwindSafe};

use tensorfuzz::runtime::{
    BinaryOp, CellWeights, ConvParams, Interpolation, NdRuntime, NdTensor, ReduceOp, RuntimeConfig,
    UnaryOp,
};
use tensorfuzz::{ByteCursor, DType, DecodeLimits, LibraryError, OpError, create_tensor};

mod common;
use common::input_builder::*;

fn decode(input: &[u8]) -> NdTensor {
    let payload = create_tensor(&mut ByteCursor::new(input), &DecodeLimits::default()).unwrap();
    NdTensor::from_payload(&payload).unwrap()
}

fn values(t: &NdTensor) -> Vec<f64> {
    t.real_array("test").unwrap().iter().copied().collect()
}

fn is_expected(outcome: Result<NdTensor, OpError>) -> bool {
    matches!(outcome, Err(OpError::Expected(_)))
}

// ----- Payload conversion -----

#[test]
fn payload_round_trip_for_every_dtype() {
    for dtype in tensorfuzz::SUPPORTED_DTYPES {
        let n = 6usize;
        let data: Vec<u8> = (0..n * dtype.byte_size()).map(|i| (i * 37 % 251) as u8).collect();
        let input = tensor_input(dtype, &[2, 3], &data);
        let payload = create_tensor(&mut ByteCursor::new(&input), &DecodeLimits::default()).unwrap();
        let tensor = NdTensor::from_payload(&payload).unwrap();
        assert_eq!(tensor.shape(), &[2, 3]);
        let back = tensor.to_payload();
        assert_eq!(back.dtype, dtype);
        assert_eq!(back.shape, vec![2, 3]);
        // bool canonicalises nonzero bytes; NaN payloads may change bits
        let again = NdTensor::from_payload(&back).unwrap();
        assert!(again.allclose(&tensor, 0.0, 0.0), "{dtype}");
    }
}

#[test]
fn inconsistent_payload_is_unexpected() {
    let payload = tensorfuzz::Tensor::new(DType::F32, vec![2], vec![0u8; 3]);
    let err = NdTensor::from_payload(&payload).unwrap_err();
    assert!(!err.is_expected());
}

// ----- Elementwise -----

#[test]
fn broadcasting_binary_ops() {
    let rt = NdRuntime::default();
    let a = decode(&f32_input(&[2, 1], &[1.0, 2.0]));
    let b = decode(&i32_input(&[3], &[10, 20, 30]));
    let sum = rt.binary(BinaryOp::Add, &a, &b).unwrap();
    assert_eq!(sum.dtype(), DType::F32);
    assert_eq!(sum.shape(), &[2, 3]);
    assert_eq!(values(&sum), vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);

    let c = decode(&f32_input(&[4], &[0.0; 4]));
    assert!(is_expected(rt.binary(BinaryOp::Mul, &b, &c)));
}

#[test]
fn inplace_matches_out_of_place() {
    let rt = NdRuntime::default();
    let x = decode(&f32_input(&[5], &[-2.0, -0.5, 0.0, 0.5, 2.0]));
    for op in UnaryOp::ALL {
        let out = rt.unary(op, &x).unwrap();
        let mut inplace = x.clone();
        rt.unary_(op, &mut inplace).unwrap();
        assert!(out.allclose(&inplace, 0.0, 0.0), "{}", op.name());
    }
}

#[test]
fn int_inputs_promote_to_default_float() {
    let mut rt = NdRuntime::default();
    let x = decode(&i32_input(&[2], &[0, 1]));
    assert_eq!(rt.unary(UnaryOp::Exp, &x).unwrap().dtype(), DType::F32);
    rt.set_default_float(DType::F64).unwrap();
    assert_eq!(rt.unary(UnaryOp::Exp, &x).unwrap().dtype(), DType::F64);
    assert!(rt.set_default_float(DType::I64).unwrap_err().is_expected());
}

// ----- Reductions -----

#[test]
fn reductions_along_dims() {
    let rt = NdRuntime::default();
    let x = decode(&f64_input(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    let sum = rt.reduce(ReduceOp::Sum, &x, Some(1), false).unwrap();
    assert_eq!(values(&sum), vec![6.0, 15.0]);
    let max = rt.reduce(ReduceOp::Max, &x, Some(-2), true).unwrap();
    assert_eq!(max.shape(), &[1, 3]);
    assert_eq!(values(&max), vec![4.0, 5.0, 6.0]);
    assert!(is_expected(rt.reduce(ReduceOp::Sum, &x, Some(2), false)));

    let empty = decode(&f32_input(&[0], &[]));
    assert!(is_expected(rt.reduce(ReduceOp::Max, &empty, None, false)));
    assert_eq!(values(&rt.reduce(ReduceOp::Sum, &empty, None, false).unwrap()), vec![0.0]);
}

#[test]
fn quantile_interpolations() {
    let rt = NdRuntime::default();
    let x = decode(&f32_input(&[4], &[4.0, 1.0, 3.0, 2.0]));
    let expect = [
        (Interpolation::Linear, 1.75),
        (Interpolation::Lower, 1.0),
        (Interpolation::Higher, 2.0),
        (Interpolation::Midpoint, 1.5),
        (Interpolation::Nearest, 2.0),
    ];
    for (interpolation, want) in expect {
        let q = rt.quantile(&x, 0.25, None, false, interpolation, false).unwrap();
        assert_eq!(values(&q), vec![want], "{interpolation:?}");
    }
    assert!(is_expected(rt.quantile(&x, 1.5, None, false, Interpolation::Linear, false)));

    let with_nan = decode(&f32_input(&[3], &[f32::NAN, 1.0, 3.0]));
    let q = rt.quantile(&with_nan, 0.5, None, false, Interpolation::Linear, false).unwrap();
    assert!(values(&q)[0].is_nan());
    let q = rt.quantile(&with_nan, 0.5, None, false, Interpolation::Linear, true).unwrap();
    assert_eq!(values(&q), vec![2.0]);
}

// ----- Shape and linalg -----

#[test]
fn reshape_then_matmul() {
    let rt = NdRuntime::default();
    let x = decode(&f32_input(&[6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    let a = rt.reshape(&x, &[2, -1]).unwrap();
    let b = rt.transpose(&a, 0, 1).unwrap();
    let c = rt.matmul(&a, &b).unwrap();
    assert_eq!(c.shape(), &[2, 2]);
    assert_eq!(values(&c), vec![14.0, 32.0, 32.0, 77.0]);
    assert!(is_expected(rt.reshape(&x, &[4, -1])));
}

#[test]
fn singular_matrix_is_expected() {
    let rt = NdRuntime::default();
    let x = decode(&f64_input(&[2, 2], &[1.0, 2.0, 2.0, 4.0]));
    let err = rt.inv(&x).unwrap_err();
    assert!(matches!(err, OpError::Expected(LibraryError::Singular { .. })));
    assert_eq!(values(&rt.det(&x).unwrap()), vec![0.0]);
}

// ----- Conv, rnn, quant, serialize -----

#[test]
fn conv1d_with_padding() {
    let rt = NdRuntime::default();
    let input = decode(&f32_input(&[1, 1, 3], &[1.0, 2.0, 3.0]));
    let weight = decode(&f32_input(&[1, 1, 3], &[1.0, 1.0, 1.0]));
    let params = ConvParams::<1> { padding: [1], ..Default::default() };
    let out = rt.conv1d(&input, &weight, None, &params).unwrap();
    assert_eq!(out.shape(), &[1, 1, 3]);
    assert_eq!(values(&out), vec![3.0, 6.0, 5.0]);

    let bad = ConvParams::<1> { groups: 0, ..Default::default() };
    assert!(is_expected(rt.conv1d(&input, &weight, None, &bad)));
}

#[test]
fn rnn_cell_weight_mismatch_is_expected() {
    let rt = NdRuntime::default();
    let input = decode(&f32_input(&[1, 2], &[0.5, -0.5]));
    let w_ih = decode(&f32_input(&[3, 2], &make_f32_data(6)));
    let w_hh = decode(&f32_input(&[3, 3], &make_f32_data(9)));
    let weights = CellWeights { w_ih: &w_ih, w_hh: &w_hh, b_ih: None, b_hh: None };
    let h = rt.rnn_tanh_cell(&input, None, &weights).unwrap();
    assert_eq!(h.shape(), &[1, 3]);
    assert!(values(&h).iter().all(|v| v.abs() <= 1.0));
    // read as GRU weights w_ih gives hidden size 1, which w_hh does not match
    assert!(is_expected(rt.gru_cell(&input, None, &weights)));
}

#[test]
fn quantize_dequantize_error_bound() {
    let rt = NdRuntime::default();
    let x = decode(&f32_input(&[4], &[-1.0, -0.26, 0.3, 1.0]));
    let q = rt.quantize_per_tensor(&x, 0.1, 10, DType::U8).unwrap();
    let back = rt.dequantize(&q).unwrap();
    for (a, b) in values(&x).iter().zip(values(&back)) {
        assert!((a - b).abs() <= 0.05 + 1e-6);
    }
    assert!(rt.quantize_per_tensor(&x, 0.0, 0, DType::U8).unwrap_err().is_expected());
}

#[test]
fn save_load_and_garbage_archives() {
    let rt = NdRuntime::default();
    let x = decode(&i32_input(&[2, 2], &[1, -2, 3, -4]));
    let bytes = rt.save(&x).unwrap();
    assert_eq!(rt.load(&bytes).unwrap(), x);
    assert!(is_expected(rt.load(&[0xff, 0x00, 0x13])));
    assert!(is_expected(rt.load(&bytes[..bytes.len() / 2])));
}

// ----- Configuration -----

#[test]
fn config_restored_after_panic() {
    let mut rt = NdRuntime::default();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = rt.scoped(RuntimeConfig::default().with_num_threads(6)).unwrap();
        panic!("inside scope");
    }));
    assert!(result.is_err());
    assert_eq!(*rt.config(), RuntimeConfig::default());
    assert!(rt.set_num_threads(0).unwrap_err().is_expected());
    assert_eq!(rt.num_threads(), 1);
}

#[test]
fn deterministic_sum_ignores_thread_count() {
    let mut rt = NdRuntime::default();
    let x = decode(&f64_input(&[5], &[1e16, 1.0, -1e16, 1.0, 3.0]));
    let sequential = rt.reduce(ReduceOp::Sum, &x, None, false).unwrap();
    let config = RuntimeConfig::default().with_num_threads(4).with_deterministic(true);
    let scoped = rt
        .with_config(config, |rt| rt.reduce(ReduceOp::Sum, &x, None, false))
        .unwrap();
    assert_eq!(values(&scoped), values(&sequential));
}
