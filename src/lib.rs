pub mod cursor;
pub mod decoder;
pub mod error;
pub mod ffi;
pub mod harness;
pub mod models;
pub mod runtime;
pub mod targets;
pub mod triage;
pub mod utils;

pub use cursor::ByteCursor;
pub use decoder::{Decoder, create_tensor, parse_dtype, parse_rank, parse_shape, parse_tensor_data};
pub use error::{Error, LibraryError, OpError, Outcome};
pub use harness::{Case, Driver, DriverConfig, Status, Target};
pub use models::{DType, DecodeLimits, SUPPORTED_DTYPES, Tensor};
pub use runtime::{NdRuntime, NdTensor, RuntimeConfig};
pub use triage::Triage;

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_tensor_bytes(shape: &[i64], values: &[f32]) -> Vec<u8> {
        // dtype selector 0 is f32; rank selector equals the rank for the
        // default limits
        let mut bytes = vec![0u8, shape.len() as u8];
        for dim in shape {
            bytes.extend_from_slice(&dim.to_le_bytes());
        }
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_into_runtime() -> Result<(), OpError> {
        let bytes = f32_tensor_bytes(&[2, 2], &[1.0, -2.0, 3.0, -4.0]);
        let mut cursor = ByteCursor::new(&bytes);
        let payload = create_tensor(&mut cursor, &DecodeLimits::default())?;
        assert!(cursor.is_exhausted());

        let rt = NdRuntime::default();
        let x = NdTensor::from_payload(&payload)?;
        let abs = rt.unary(runtime::UnaryOp::Abs, &x)?;
        let total = rt.reduce(runtime::ReduceOp::Sum, &abs, None, false)?;
        assert_eq!(total.float_array("sum")?.iter().copied().collect::<Vec<_>>(), vec![10.0]);
        Ok(())
    }

    #[test]
    fn test_driver_runs_every_target_on_small_inputs() {
        let mut driver = Driver::new(DriverConfig::default().with_catch_panics(true));
        let inputs: [&[u8]; 4] = [&[], &[0, 0], &[0xff; 7], &[3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 9, 9, 9, 9]];
        for target in targets::all() {
            for input in inputs {
                let outcome = driver.execute(target, input);
                assert!(
                    !matches!(&outcome, Err(OpError::Unexpected(m)) if m.starts_with("panic")),
                    "{} on {input:?}: {outcome:?}",
                    target.name
                );
            }
        }
    }

    #[test]
    fn test_outcome_tags() -> Result<(), OpError> {
        let rt = NdRuntime::default();
        let a = NdTensor::from_vec(DType::F32, &[2], vec![1.0, 2.0])?;
        let b = NdTensor::from_vec(DType::F32, &[3], vec![1.0, 2.0, 3.0])?;
        let err = rt.binary(runtime::BinaryOp::Add, &a, &b).unwrap_err();
        assert!(matches!(err, OpError::Expected(LibraryError::ShapeMismatch { .. })));

        let decode_err: OpError = Error::InputTooSmall { offset: 0, size: 1 }.into();
        assert!(!decode_err.is_expected());
        Ok(())
    }
}
