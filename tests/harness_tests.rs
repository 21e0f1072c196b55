use std::fs;

use proptest::prelude::*;

use tensorfuzz::harness::{Case, Driver, DriverConfig, Status, Target};
use tensorfuzz::runtime::ReduceOp;
use tensorfuzz::{DType, OpError, Outcome, Tensor, Triage, targets};

mod common;
use common::input_builder::*;

fn run(name: &str, input: &[u8]) -> Status {
    let target = targets::find(name).unwrap();
    Driver::default().run(target, input)
}

// ----- Catalog -----

#[test]
fn catalog_lists_every_target_once() {
    let names: Vec<_> = targets::all().iter().map(|t| t.name).collect();
    assert_eq!(
        names,
        vec![
            "decode",
            "unary",
            "binary",
            "reduce",
            "nanquantile",
            "shape",
            "linalg",
            "conv",
            "rnn_cell",
            "quantize",
            "serialize",
            "config_scope",
            "fft",
            "pool",
            "batch_norm",
            "loss",
        ]
    );
}

#[test]
fn short_inputs_are_kept_without_running() {
    let mut driver = Driver::default();
    for target in targets::all() {
        let input = vec![0xffu8; target.min_size - 1];
        assert_eq!(driver.run(target, &input), Status::Keep, "{}", target.name);
    }
    assert_eq!(driver.iterations(), targets::all().len() as u64);
}

// ----- Well-formed inputs -----

#[test]
fn decode_keeps_a_tensor_sequence() {
    let input = join(&[&f32_input(&[2, 2], &make_f32_data(4)), &i32_input(&[3], &[1, 2, 3])]);
    assert_eq!(run("decode", &input), Status::Keep);
}

#[test]
fn unary_keeps_every_op() {
    for op in 0u8..14 {
        let input = join(&[&f32_input(&[3], &[-1.0, 0.0, 2.0]), &[op]]);
        assert_eq!(run("unary", &input), Status::Keep, "op {op}");
    }
}

#[test]
fn binary_keeps_with_injected_nan() {
    let input = join(&[
        &f32_input(&[2, 2], &make_f32_data(4)),
        &f32_input(&[2], &[1.0, 2.0]),
        &[0, 1],
        &3u64.to_le_bytes(),
    ]);
    assert_eq!(run("binary", &input), Status::Keep);
}

#[test]
fn binary_shape_mismatch_is_kept() {
    let input = join(&[
        &f32_input(&[3], &make_f32_data(3)),
        &f32_input(&[2], &[1.0, 2.0]),
        &[0, 0],
    ]);
    assert_eq!(run("binary", &input), Status::Keep);
}

#[test]
fn reduce_keeps_softmax() {
    let softmax = ReduceOp::ALL.len() as u8 + 3;
    // whole-tensor softmax falls back to the last dim
    let last = join(&[&f32_input(&[2, 3], &make_f32_data(6)), &[softmax, 0]]);
    assert_eq!(run("reduce", &last), Status::Keep);
    let ints = join(&[&i32_input(&[4], &[1, 2, 3, 4]), &[softmax, 1], &0i64.to_le_bytes(), &[0]]);
    assert_eq!(run("reduce", &ints), Status::Keep);
}

#[test]
fn conv_keeps_valid_and_invalid_parameters() {
    let tensors = join(&[
        &f32_input(&[1, 1, 4], &make_f32_data(4)),
        &f32_input(&[1, 1, 2], &[1.0, -1.0]),
    ]);
    let valid = join(&[&tensors, &[0, 1, 1, 1, 1]]);
    assert_eq!(run("conv", &valid), Status::Keep);
    // stride 0 is rejected by the runtime
    let invalid = join(&[&tensors, &[0, 0, 1, 1, 1]]);
    assert_eq!(run("conv", &invalid), Status::Keep);
}

#[test]
fn conv_missing_weight_falls_back_to_pointwise() {
    let input = f32_input(&[1, 1, 4], &make_f32_data(4));
    assert_eq!(run("conv", &input), Status::Keep);
    let batched = f32_input(&[1, 2, 2, 2], &make_f32_data(8));
    assert_eq!(run("conv", &batched), Status::Keep);
}

#[test]
fn rnn_cell_keeps_generated_weights() {
    for cell in 0u8..4 {
        let input = join(&[&[cell], &f32_input(&[2, 3], &make_f32_data(6)), &[1, 1]]);
        assert_eq!(run("rnn_cell", &input), Status::Keep, "cell {cell}");
    }
}

#[test]
fn rnn_cell_decoded_weights_fall_back_when_input_runs_out() {
    for cell in 0u8..4 {
        // hidden size 2, then the decoded-weights branch with nothing left
        let input = join(&[&[cell], &f32_input(&[2, 3], &make_f32_data(6)), &[1, 0]]);
        assert_eq!(run("rnn_cell", &input), Status::Keep, "cell {cell}");
    }
}

#[test]
fn serialize_keeps_selector_plus_one_byte() {
    assert_eq!(run("serialize", &[0, 0]), Status::Keep);
}

#[test]
fn serialize_keeps_overflowing_archive_shape() {
    #[derive(serde::Serialize)]
    struct Archive {
        version: u32,
        tensor: Tensor,
    }
    let archive = Archive {
        version: 1,
        tensor: Tensor::new(DType::F32, vec![0, 1 << 40, 1 << 40], vec![]),
    };
    let mut bytes = vec![1u8];
    ciborium::into_writer(&archive, &mut bytes).unwrap();
    assert_eq!(run("serialize", &bytes), Status::Keep);
}

#[test]
fn serialize_keeps_round_trip_and_garbage() {
    let round_trip = join(&[&[0], &i32_input(&[2], &[5, -5])]);
    assert_eq!(run("serialize", &round_trip), Status::Keep);
    let garbage = [1u8, 0xde, 0xad, 0xbe, 0xef];
    assert_eq!(run("serialize", &garbage), Status::Keep);
}

#[test]
fn config_scope_restores_configuration() {
    let input = join(&[&[4, 1, 0], &i32_input(&[2, 2], &[1, 2, 3, 4])]);
    let target = targets::find("config_scope").unwrap();
    let mut driver = Driver::default();
    let before = *driver.runtime().config();
    assert_eq!(driver.run(target, &input), Status::Keep);
    assert_eq!(*driver.runtime().config(), before);
}

#[test]
fn quantize_keeps_every_qdtype() {
    for qdtype in 0u8..3 {
        let input = join(&[&f32_input(&[4], &make_f32_data(4)), &[qdtype, 1], &0.25f64.to_le_bytes(), &[130]]);
        assert_eq!(run("quantize", &input), Status::Keep, "qdtype {qdtype}");
    }
}

#[test]
fn fft_keeps_every_variant() {
    for variant in 0u8..3 {
        // last axis, n from the lane, backward norm
        let input = join(&[&f32_input(&[4], &make_f32_data(4)), &0i64.to_le_bytes(), &[1, 0, variant]]);
        assert_eq!(run("fft", &input), Status::Keep, "variant {variant}");
    }
}

#[test]
fn fft_bad_length_is_kept() {
    // n = -1
    let input = join(&[&f32_input(&[4], &make_f32_data(4)), &0i64.to_le_bytes(), &[0, 0, 0, 0]]);
    assert_eq!(run("fft", &input), Status::Keep);
}

#[test]
fn pool_keeps_max_and_avg() {
    // kernel 2, stride 2, padding 0, dilation 1, floor mode, square window
    let params = [2u8, 2, 1, 1, 0, 0];
    let x = f32_input(&[1, 4, 4], &make_f32_data(16));
    let max = join(&[&params, &x, &[1]]);
    assert_eq!(run("pool", &max), Status::Keep);
    let avg = join(&[&params, &x, &[0, 0]]);
    assert_eq!(run("pool", &avg), Status::Keep);
    // kernel 0 is rejected by the runtime
    let invalid = join(&[&[0u8, 2, 1, 1, 0, 0], &x, &[1]]);
    assert_eq!(run("pool", &invalid), Status::Keep);
}

#[test]
fn batch_norm_keeps_training_and_eval() {
    for training in 0u8..2 {
        let input = join(&[
            &[training, 0, 1],
            &0.1f64.to_le_bytes(),
            &[1],
            &0.5f64.to_le_bytes(),
            &f32_input(&[2, 3], &make_f32_data(6)),
        ]);
        assert_eq!(run("batch_norm", &input), Status::Keep, "training {training}");
    }
}

#[test]
fn loss_keeps_every_loss() {
    for selector in 0u8..5 {
        // mean reduction, width 0.55, target copied from the input
        let input = join(&[&[selector, 1, 1], &0.5f64.to_le_bytes(), &f32_input(&[4], &make_f32_data(4))]);
        assert_eq!(run("loss", &input), Status::Keep, "loss {selector}");
    }
}

// ----- Triage -----

fn always_fails(_case: &mut Case<'_>) -> Outcome<()> {
    Err(OpError::Unexpected("invariant broken".into()))
}

#[test]
fn discarded_inputs_are_triaged() {
    let dir = tempfile::tempdir().unwrap();
    let triage = Triage::new(dir.path().join("triage"));
    let config = DriverConfig::default().with_triage(Some(triage.clone()));
    let mut driver = Driver::new(config);
    let failing = Target {
        name: "failing",
        summary: "always reports an unexpected error",
        min_size: 0,
        run: always_fails,
    };

    let input = f32_input(&[1, 1, 4], &make_f32_data(4));
    assert_eq!(driver.run(&failing, &input), Status::Discard);

    let log = fs::read_to_string(triage.error_log_path()).unwrap();
    assert!(log.starts_with("Timestamp: "));
    assert!(log.contains("Exception caught in failing:"));
    let saved = fs::read(triage.error_inputs_path()).unwrap();
    assert!(saved.windows(input.len()).any(|w| w == input.as_slice()));
}

#[test]
fn kept_inputs_leave_no_error_log() {
    let dir = tempfile::tempdir().unwrap();
    let triage = Triage::new(dir.path());
    let mut driver = Driver::new(DriverConfig::default().with_triage(Some(triage.clone())));
    let input = join(&[&f32_input(&[3], &[1.0, 2.0, 3.0]), &[0]]);
    assert_eq!(driver.run(targets::find("unary").unwrap(), &input), Status::Keep);
    assert!(!triage.error_log_path().exists());
}

// ----- Robustness -----

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn no_target_panics(input in prop::collection::vec(any::<u8>(), 0..192)) {
        let mut driver = Driver::new(DriverConfig::default().with_catch_panics(true));
        for target in targets::all() {
            let outcome = driver.execute(target, &input);
            let panicked = matches!(&outcome, Err(OpError::Unexpected(m)) if m.starts_with("panic"));
            prop_assert!(!panicked, "{}: {:?}", target.name, outcome);
        }
    }
}
