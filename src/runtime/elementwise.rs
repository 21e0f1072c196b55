//! Pointwise operators.

use ndarray::{ArrayD, ArrayViewD, IxDyn, Zip};
use num_complex::Complex64;

use super::tensor::{
    broadcast_shape, complex_values, int_values, real_values, round_c64, round_float, wrap_int, Storage,
};
use super::{NdRuntime, NdTensor};
use crate::error::{OpError, Outcome};
use crate::models::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Abs,
    Neg,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tanh,
    Sigmoid,
    Relu,
    Floor,
    Ceil,
    Sign,
    Reciprocal,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 14] = [
        UnaryOp::Abs,
        UnaryOp::Neg,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Sqrt,
        UnaryOp::Sin,
        UnaryOp::Cos,
        UnaryOp::Tanh,
        UnaryOp::Sigmoid,
        UnaryOp::Relu,
        UnaryOp::Floor,
        UnaryOp::Ceil,
        UnaryOp::Sign,
        UnaryOp::Reciprocal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Neg => "neg",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Relu => "relu",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Sign => "sign",
            UnaryOp::Reciprocal => "reciprocal",
        }
    }

    /// Ops that keep integer inputs integral.
    fn preserves_int(&self) -> bool {
        matches!(
            self,
            UnaryOp::Abs | UnaryOp::Neg | UnaryOp::Relu | UnaryOp::Floor | UnaryOp::Ceil | UnaryOp::Sign
        )
    }

    fn apply_real(&self, v: f64) -> f64 {
        match self {
            UnaryOp::Abs => v.abs(),
            UnaryOp::Neg => -v,
            UnaryOp::Exp => v.exp(),
            UnaryOp::Log => v.ln(),
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Tanh => v.tanh(),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-v).exp()),
            UnaryOp::Relu => {
                if v > 0.0 || v.is_nan() {
                    v
                } else {
                    0.0
                }
            }
            UnaryOp::Floor => v.floor(),
            UnaryOp::Ceil => v.ceil(),
            UnaryOp::Sign => {
                if v.is_nan() {
                    0.0
                } else if v > 0.0 {
                    1.0
                } else if v < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            UnaryOp::Reciprocal => 1.0 / v,
        }
    }

    fn apply_int(&self, v: i64) -> i64 {
        match self {
            UnaryOp::Abs => v.wrapping_abs(),
            UnaryOp::Neg => v.wrapping_neg(),
            UnaryOp::Relu => v.max(0),
            UnaryOp::Sign => v.signum(),
            _ => v,
        }
    }

    fn apply_complex(&self, v: Complex64) -> Option<Complex64> {
        Some(match self {
            UnaryOp::Neg => -v,
            UnaryOp::Exp => v.exp(),
            UnaryOp::Log => v.ln(),
            UnaryOp::Sqrt => v.sqrt(),
            UnaryOp::Sin => v.sin(),
            UnaryOp::Cos => v.cos(),
            UnaryOp::Tanh => v.tanh(),
            UnaryOp::Reciprocal => v.inv(),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    Pow,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 7] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Maximum,
        BinaryOp::Minimum,
        BinaryOp::Pow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Pow => "pow",
        }
    }

    fn apply_real(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            // NaN propagates, unlike f64::max
            BinaryOp::Maximum => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.max(b)
                }
            }
            BinaryOp::Minimum => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.min(b)
                }
            }
            BinaryOp::Pow => a.powf(b),
        }
    }

    fn apply_int(&self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Maximum => a.max(b),
            BinaryOp::Minimum => a.min(b),
            BinaryOp::Pow => int_pow(a, b),
            // true division never runs on integers
            BinaryOp::Div => 0,
        }
    }

    fn apply_complex(&self, a: Complex64, b: Complex64) -> Option<Complex64> {
        Some(match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powc(b),
            BinaryOp::Maximum | BinaryOp::Minimum => return None,
        })
    }
}

/// Wrapping exponentiation by squaring; `b` is non-negative.
fn int_pow(mut base: i64, mut exp: i64) -> i64 {
    let mut acc: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

/// Result dtype of a binary op between `a` and `b`.
pub(crate) fn promote(a: DType, b: DType) -> DType {
    use DType::*;
    if a == b {
        return a;
    }
    if a.is_complex() || b.is_complex() {
        return if a == C128 || b == C128 || a == F64 || b == F64 {
            C128
        } else {
            C64
        };
    }
    if a.is_float() && b.is_float() {
        return match (a, b) {
            (F64, _) | (_, F64) => F64,
            (F32, _) | (_, F32) => F32,
            // f16 with bf16
            _ => F32,
        };
    }
    if a.is_float() {
        return a;
    }
    if b.is_float() {
        return b;
    }
    match (a, b) {
        (Bool, other) | (other, Bool) => other,
        (U8, I8) | (I8, U8) => I16,
        (U8, other) | (other, U8) => other,
        _ => {
            if a.byte_size() >= b.byte_size() {
                a
            } else {
                b
            }
        }
    }
}

impl NdRuntime {
    /// Out-of-place unary op. Integer and bool inputs to transcendental ops
    /// are promoted to the configured default float.
    pub fn unary(&self, op: UnaryOp, x: &NdTensor) -> Outcome<NdTensor> {
        let name = op.name();
        match x.storage() {
            Storage::Float(a) => NdTensor::float(x.dtype(), a.mapv(|v| op.apply_real(v))),
            Storage::Complex(a) => {
                if op == UnaryOp::Abs {
                    let real = if x.dtype() == DType::C64 { DType::F32 } else { DType::F64 };
                    return NdTensor::float(real, a.mapv(|v| v.norm()));
                }
                if op.apply_complex(Complex64::new(0.0, 0.0)).is_none() {
                    return Err(OpError::unsupported(name, x.dtype()));
                }
                NdTensor::complex(x.dtype(), a.mapv(|v| op.apply_complex(v).unwrap_or(v)))
            }
            Storage::Bool(_) if op == UnaryOp::Neg => Err(OpError::invalid(
                name,
                "negation on a bool tensor is not supported, use logical_not",
            )),
            Storage::Bool(_) if op == UnaryOp::Relu => Err(OpError::unsupported(name, x.dtype())),
            Storage::Int(_) | Storage::Bool(_) if op.preserves_int() => {
                let values = int_values(x.storage());
                let dtype = if x.dtype() == DType::Bool { DType::U8 } else { x.dtype() };
                let out = NdTensor::int(dtype, values.mapv(|v| op.apply_int(v)))?;
                if x.dtype() == DType::Bool {
                    out.to_dtype(DType::Bool)
                } else {
                    Ok(out)
                }
            }
            Storage::Int(_) | Storage::Bool(_) => {
                let values = real_values(x.storage());
                NdTensor::float(self.config().default_float, values.mapv(|v| op.apply_real(v)))
            }
        }
    }

    /// In-place unary op, computed directly in `x`'s storage. Fails when the
    /// out-of-place result would need a different dtype.
    pub fn unary_(&self, op: UnaryOp, x: &mut NdTensor) -> Outcome<()> {
        let name = op.name();
        let dtype = x.dtype();
        match x.storage_mut() {
            Storage::Float(a) => a.mapv_inplace(|v| round_float(dtype, op.apply_real(v))),
            Storage::Complex(_) if op == UnaryOp::Abs => {
                let real = if dtype == DType::C64 { DType::F32 } else { DType::F64 };
                return Err(cast_error(name, real, dtype));
            }
            Storage::Complex(a) => {
                if op.apply_complex(Complex64::new(0.0, 0.0)).is_none() {
                    return Err(OpError::unsupported(name, dtype));
                }
                a.mapv_inplace(|v| {
                    let out = op.apply_complex(v).unwrap_or(v);
                    if dtype == DType::C64 { round_c64(out) } else { out }
                });
            }
            Storage::Bool(_) if op == UnaryOp::Neg => {
                return Err(OpError::invalid(
                    name,
                    "negation on a bool tensor is not supported, use logical_not",
                ));
            }
            Storage::Bool(_) if op == UnaryOp::Relu => return Err(OpError::unsupported(name, dtype)),
            Storage::Bool(a) if op.preserves_int() => a.mapv_inplace(|v| op.apply_int(v as i64) != 0),
            Storage::Int(a) if op.preserves_int() => a.mapv_inplace(|v| wrap_int(dtype, op.apply_int(v))),
            Storage::Int(_) | Storage::Bool(_) => {
                return Err(cast_error(name, self.config().default_float, dtype));
            }
        }
        Ok(())
    }

    /// Broadcasting binary op.
    pub fn binary(&self, op: BinaryOp, a: &NdTensor, b: &NdTensor) -> Outcome<NdTensor> {
        let name = op.name();
        let shape = broadcast_shape(a.shape(), b.shape())
            .ok_or_else(|| OpError::shape_mismatch(name, a.shape(), b.shape()))?;
        let dim = IxDyn(&shape);
        let mut dtype = promote(a.dtype(), b.dtype());

        if dtype == DType::Bool {
            match op {
                BinaryOp::Sub => {
                    return Err(OpError::invalid(
                        name,
                        "subtraction with two bool tensors is not supported, use logical_xor",
                    ));
                }
                BinaryOp::Div => dtype = self.config().default_float,
                _ => dtype = DType::I64,
            }
        } else if op == BinaryOp::Div && !dtype.is_float() && !dtype.is_complex() {
            dtype = self.config().default_float;
        }

        if dtype.is_complex() {
            let one = Complex64::new(1.0, 0.0);
            if op.apply_complex(one, one).is_none() {
                return Err(OpError::unsupported(name, dtype));
            }
            let (x, y) = (complex_values(a.storage()), complex_values(b.storage()));
            let (x, y) = broadcast_pair(&x, &y, &dim)?;
            let out = Zip::from(&x)
                .and(&y)
                .map_collect(|&p, &q| op.apply_complex(p, q).unwrap_or_default());
            return NdTensor::complex(dtype, out);
        }

        if dtype.is_float() {
            let (x, y) = (real_values(a.storage()), real_values(b.storage()));
            let (x, y) = broadcast_pair(&x, &y, &dim)?;
            let out = Zip::from(&x).and(&y).map_collect(|&p, &q| op.apply_real(p, q));
            return NdTensor::float(dtype, out);
        }

        let (x, y) = (int_values(a.storage()), int_values(b.storage()));
        let (x, y) = broadcast_pair(&x, &y, &dim)?;
        if op == BinaryOp::Pow && y.iter().any(|&e| e < 0) {
            return Err(OpError::invalid(
                name,
                "integers to negative integer powers are not allowed",
            ));
        }
        let out = Zip::from(&x).and(&y).map_collect(|&p, &q| op.apply_int(p, q));
        let result = NdTensor::int(dtype, out)?;
        if a.dtype() == DType::Bool && b.dtype() == DType::Bool && op != BinaryOp::Pow {
            result.to_dtype(DType::Bool)
        } else {
            Ok(result)
        }
    }

    /// Dtype [`NdRuntime::binary`] returns for operands of `a` and `b`.
    fn binary_result_dtype(&self, op: BinaryOp, a: DType, b: DType) -> Outcome<DType> {
        Ok(match promote(a, b) {
            DType::Bool => match op {
                BinaryOp::Sub => {
                    return Err(OpError::invalid(
                        op.name(),
                        "subtraction with two bool tensors is not supported, use logical_xor",
                    ));
                }
                BinaryOp::Div => self.config().default_float,
                BinaryOp::Pow => DType::I64,
                _ => DType::Bool,
            },
            d if op == BinaryOp::Div && !d.is_float() && !d.is_complex() => self.config().default_float,
            d => d,
        })
    }

    /// In-place binary op. `a` keeps its shape and dtype; `b` is broadcast
    /// into it and each element is rounded to the promoted result dtype,
    /// then to `a`'s, straight in `a`'s storage. The promoted dtype has to
    /// be castable to `a`'s dtype.
    pub fn binary_(&self, op: BinaryOp, a: &mut NdTensor, b: &NdTensor) -> Outcome<()> {
        let name = op.name();
        let shape = broadcast_shape(a.shape(), b.shape())
            .ok_or_else(|| OpError::shape_mismatch(name, a.shape(), b.shape()))?;
        if shape != a.shape() {
            return Err(OpError::shape_mismatch(name, a.shape(), &shape));
        }
        let dtype = a.dtype();
        let result = self.binary_result_dtype(op, dtype, b.dtype())?;
        if !can_cast(result, dtype) {
            return Err(cast_error(name, result, dtype));
        }

        match a.storage_mut() {
            Storage::Complex(x) => {
                let one = Complex64::new(1.0, 0.0);
                if op.apply_complex(one, one).is_none() {
                    return Err(OpError::unsupported(name, dtype));
                }
                let y = complex_values(b.storage());
                let y = broadcast_to(&y, x.raw_dim())?;
                Zip::from(x).and(y).for_each(|p, &q| {
                    let out = op.apply_complex(*p, q).unwrap_or_default();
                    *p = if result == DType::C64 || dtype == DType::C64 { round_c64(out) } else { out };
                });
            }
            Storage::Float(x) => {
                let y = real_values(b.storage());
                let y = broadcast_to(&y, x.raw_dim())?;
                Zip::from(x)
                    .and(y)
                    .for_each(|p, &q| *p = round_float(dtype, round_float(result, op.apply_real(*p, q))));
            }
            Storage::Int(x) => {
                let y = int_values(b.storage());
                if op == BinaryOp::Pow && y.iter().any(|&e| e < 0) {
                    return Err(OpError::invalid(
                        name,
                        "integers to negative integer powers are not allowed",
                    ));
                }
                let y = broadcast_to(&y, x.raw_dim())?;
                Zip::from(x)
                    .and(y)
                    .for_each(|p, &q| *p = wrap_int(dtype, op.apply_int(*p, q)));
            }
            Storage::Bool(x) => {
                let y = int_values(b.storage());
                let y = broadcast_to(&y, x.raw_dim())?;
                Zip::from(x)
                    .and(y)
                    .for_each(|p, &q| *p = op.apply_int(*p as i64, q) != 0);
            }
        }
        Ok(())
    }
}

/// Same-kind casting: complex stays complex, floats never become integers
/// and only bool results fit a bool tensor.
pub(crate) fn can_cast(from: DType, to: DType) -> bool {
    if from.is_complex() {
        return to.is_complex();
    }
    if from.is_float() {
        return to.is_float() || to.is_complex();
    }
    from == DType::Bool || to != DType::Bool
}

fn cast_error(op: &'static str, result: DType, out: DType) -> OpError {
    OpError::invalid(
        op,
        format!("result type {result} can't be cast to the desired output type {out}"),
    )
}

fn broadcast_to<T>(y: &ArrayD<T>, dim: IxDyn) -> Outcome<ArrayViewD<'_, T>> {
    y.broadcast(dim)
        .ok_or_else(|| OpError::Unexpected("broadcast failed after shape check".into()))
}

fn broadcast_pair<T: Clone>(
    x: &ArrayD<T>,
    y: &ArrayD<T>,
    dim: &IxDyn,
) -> Outcome<(ArrayD<T>, ArrayD<T>)> {
    let xb = x
        .broadcast(dim.clone())
        .ok_or_else(|| OpError::Unexpected("broadcast failed after shape check".into()))?;
    let yb = y
        .broadcast(dim.clone())
        .ok_or_else(|| OpError::Unexpected("broadcast failed after shape check".into()))?;
    Ok((xb.to_owned(), yb.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn f32_tensor(values: &[f64]) -> NdTensor {
        NdTensor::from_vec(DType::F32, &[values.len()], values.to_vec()).unwrap()
    }

    fn i64_tensor(values: &[i64]) -> NdTensor {
        NdTensor::int(DType::I64, arr1(values).into_dyn()).unwrap()
    }

    #[test]
    fn test_promote() {
        assert_eq!(promote(DType::U8, DType::I8), DType::I16);
        assert_eq!(promote(DType::Bool, DType::I32), DType::I32);
        assert_eq!(promote(DType::F16, DType::BF16), DType::F32);
        assert_eq!(promote(DType::I64, DType::F16), DType::F16);
        assert_eq!(promote(DType::C64, DType::F64), DType::C128);
    }

    #[test]
    fn test_unary_int_promotes_transcendental() {
        let rt = NdRuntime::default();
        let x = i64_tensor(&[4, 9]);
        let out = rt.unary(UnaryOp::Sqrt, &x).unwrap();
        assert_eq!(out.dtype(), DType::F32);
        assert_eq!(out.float_array("t").unwrap().as_slice().unwrap(), &[2.0, 3.0]);

        let abs = rt.unary(UnaryOp::Abs, &i64_tensor(&[-3, i64::MIN])).unwrap();
        assert_eq!(abs.dtype(), DType::I64);
    }

    #[test]
    fn test_inplace_rejects_promotion() {
        let rt = NdRuntime::default();
        let mut x = i64_tensor(&[1, 2]);
        let err = rt.unary_(UnaryOp::Exp, &mut x).unwrap_err();
        assert!(err.is_expected());
        rt.unary_(UnaryOp::Neg, &mut x).unwrap();
        assert_eq!(x, i64_tensor(&[-1, -2]));
    }

    #[test]
    fn test_complex_abs_and_unsupported() {
        let rt = NdRuntime::default();
        let z = NdTensor::complex(DType::C128, arr1(&[Complex64::new(3.0, 4.0)]).into_dyn()).unwrap();
        let abs = rt.unary(UnaryOp::Abs, &z).unwrap();
        assert_eq!(abs.dtype(), DType::F64);
        assert_eq!(abs.float_array("t").unwrap()[[0]], 5.0);
        assert!(rt.unary(UnaryOp::Relu, &z).unwrap_err().is_expected());
    }

    #[test]
    fn test_bool_neg_is_expected_error() {
        let rt = NdRuntime::default();
        let b = NdTensor::bool(arr1(&[true, false]).into_dyn());
        assert!(rt.unary(UnaryOp::Neg, &b).unwrap_err().is_expected());
        assert!(rt.binary(BinaryOp::Sub, &b, &b).unwrap_err().is_expected());
        let sum = rt.binary(BinaryOp::Add, &b, &b).unwrap();
        assert_eq!(sum.dtype(), DType::Bool);
    }

    #[test]
    fn test_binary_broadcasts() {
        let rt = NdRuntime::default();
        let a = NdTensor::from_vec(DType::F32, &[2, 1], vec![1.0, 2.0]).unwrap();
        let b = f32_tensor(&[10.0, 20.0, 30.0]);
        let out = rt.binary(BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(
            out.float_array("t").unwrap().iter().copied().collect::<Vec<_>>(),
            vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]
        );
        let err = rt.binary(BinaryOp::Add, &f32_tensor(&[1.0, 2.0]), &b).unwrap_err();
        assert!(matches!(err, OpError::Expected(_)));
    }

    #[test]
    fn test_int_division_and_pow() {
        let rt = NdRuntime::default();
        let a = i64_tensor(&[7, -7]);
        let b = i64_tensor(&[2, 0]);
        let q = rt.binary(BinaryOp::Div, &a, &b).unwrap();
        assert_eq!(q.dtype(), DType::F32);
        let q = q.float_array("t").unwrap();
        assert_eq!(q[[0]], 3.5);
        assert_eq!(q[[1]], f64::NEG_INFINITY);

        let neg = i64_tensor(&[-1, 2]);
        assert!(rt.binary(BinaryOp::Pow, &a, &neg).unwrap_err().is_expected());
        let p = rt.binary(BinaryOp::Pow, &i64_tensor(&[3]), &i64_tensor(&[4])).unwrap();
        assert_eq!(p, i64_tensor(&[81]));
    }

    #[test]
    fn test_maximum_propagates_nan() {
        let rt = NdRuntime::default();
        let out = rt
            .binary(BinaryOp::Maximum, &f32_tensor(&[f64::NAN, 1.0]), &f32_tensor(&[0.0, 2.0]))
            .unwrap();
        let out = out.float_array("t").unwrap();
        assert!(out[[0]].is_nan());
        assert_eq!(out[[1]], 2.0);
    }

    #[test]
    fn test_inplace_binary_keeps_shape() {
        let rt = NdRuntime::default();
        let mut a = f32_tensor(&[1.0]);
        let b = f32_tensor(&[1.0, 2.0]);
        assert!(rt.binary_(BinaryOp::Add, &mut a, &b).unwrap_err().is_expected());
        assert_eq!(a, f32_tensor(&[1.0]));
        let mut c = f32_tensor(&[1.0, 2.0]);
        rt.binary_(BinaryOp::Mul, &mut c, &f32_tensor(&[3.0])).unwrap();
        assert_eq!(c, f32_tensor(&[3.0, 6.0]));
    }

    #[test]
    fn test_inplace_unary_matches_out_of_place() {
        let rt = NdRuntime::default();
        let inputs = [
            NdTensor::from_vec(DType::F16, &[4], vec![-1.5, 0.0, 0.1, 7.0]).unwrap(),
            NdTensor::from_vec(DType::F32, &[2, 2], vec![-2.0, f64::NAN, 0.3, 1e30]).unwrap(),
            NdTensor::int(DType::I8, arr1(&[-128, -1, 0, 127]).into_dyn()).unwrap(),
            NdTensor::bool(arr1(&[true, false]).into_dyn()),
            NdTensor::complex(DType::C64, arr1(&[Complex64::new(0.5, -1.0)]).into_dyn()).unwrap(),
        ];
        for x in &inputs {
            for op in UnaryOp::ALL {
                let mut inplace = x.clone();
                match (rt.unary(op, x), rt.unary_(op, &mut inplace)) {
                    (Ok(out), Ok(())) => {
                        assert!(inplace.allclose(&out, 0.0, 0.0), "{} on {}", op.name(), x.dtype());
                        assert_eq!(inplace.dtype(), x.dtype());
                    }
                    (Ok(out), Err(e)) => {
                        assert!(e.is_expected());
                        assert_ne!(out.dtype(), x.dtype(), "{} on {}", op.name(), x.dtype());
                        assert_eq!(&inplace, x);
                    }
                    (Err(_), Err(e)) => assert!(e.is_expected()),
                    (Err(e), Ok(())) => panic!("{} on {}: only in-place succeeded: {e}", op.name(), x.dtype()),
                }
            }
        }
    }

    #[test]
    fn test_inplace_rejects_complex_abs() {
        let rt = NdRuntime::default();
        let mut z = NdTensor::complex(DType::C128, arr1(&[Complex64::new(3.0, 4.0)]).into_dyn()).unwrap();
        assert!(rt.unary_(UnaryOp::Abs, &mut z).unwrap_err().is_expected());
        assert_eq!(z.dtype(), DType::C128);
    }

    #[test]
    fn test_inplace_binary_casts_same_kind() {
        let rt = NdRuntime::default();

        // f64 result narrows into the f32 tensor
        let mut a = f32_tensor(&[1.0, 2.0]);
        let b = NdTensor::from_vec(DType::F64, &[2], vec![0.1, 0.2]).unwrap();
        rt.binary_(BinaryOp::Add, &mut a, &b).unwrap();
        let expected = rt.binary(BinaryOp::Add, &f32_tensor(&[1.0, 2.0]), &b).unwrap();
        assert_eq!(a, expected.to_dtype(DType::F32).unwrap());

        // i64 result wraps into the i8 tensor
        let mut small = NdTensor::int(DType::I8, arr1(&[100]).into_dyn()).unwrap();
        rt.binary_(BinaryOp::Add, &mut small, &i64_tensor(&[100])).unwrap();
        assert_eq!(small, NdTensor::int(DType::I8, arr1(&[-56]).into_dyn()).unwrap());

        // float into int, complex into real, int into bool
        let mut ints = i64_tensor(&[1, 2]);
        assert!(rt.binary_(BinaryOp::Add, &mut ints, &f32_tensor(&[0.5])).unwrap_err().is_expected());
        assert!(rt.binary_(BinaryOp::Div, &mut ints, &i64_tensor(&[2])).unwrap_err().is_expected());
        assert_eq!(ints, i64_tensor(&[1, 2]));
        let z = NdTensor::complex(DType::C64, arr1(&[Complex64::new(1.0, 1.0)]).into_dyn()).unwrap();
        assert!(rt.binary_(BinaryOp::Mul, &mut a, &z).unwrap_err().is_expected());
        let mut flags = NdTensor::bool(arr1(&[true, false]).into_dyn());
        assert!(rt.binary_(BinaryOp::Add, &mut flags, &i64_tensor(&[1])).unwrap_err().is_expected());

        // bool with bool stays bool
        let other = NdTensor::bool(arr1(&[false, false]).into_dyn());
        rt.binary_(BinaryOp::Maximum, &mut flags, &other).unwrap();
        assert_eq!(flags, NdTensor::bool(arr1(&[true, false]).into_dyn()));
    }

    #[test]
    fn test_can_cast() {
        assert!(can_cast(DType::F64, DType::BF16));
        assert!(can_cast(DType::I64, DType::U8));
        assert!(can_cast(DType::Bool, DType::Bool));
        assert!(!can_cast(DType::F16, DType::I64));
        assert!(!can_cast(DType::C64, DType::F64));
        assert!(!can_cast(DType::U8, DType::Bool));
    }
}
