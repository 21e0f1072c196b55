//! Matrix products and dense linear algebra on the last two dimensions.

use ndarray::{ArrayD, Axis, IxDyn};

use super::tensor::{broadcast_shape, Storage};
use super::{NdRuntime, NdTensor};
use crate::error::{LibraryError, OpError, Outcome};
use crate::models::DType;

/// Matrices stacked along leading batch dimensions, row-major.
struct Batched {
    batch: Vec<usize>,
    n: usize,
    values: Vec<f64>,
}

impl Batched {
    fn count(&self) -> usize {
        self.batch.iter().product()
    }

    fn matrix(&self, index: usize) -> Vec<f64> {
        let size = self.n * self.n;
        self.values[index * size..(index + 1) * size].to_vec()
    }

    fn shape(&self) -> Vec<usize> {
        let mut shape = self.batch.clone();
        shape.extend([self.n, self.n]);
        shape
    }
}

fn linalg_dtype(op: &'static str, x: &NdTensor) -> Outcome<()> {
    match x.dtype() {
        DType::F32 | DType::F64 => Ok(()),
        other => Err(OpError::unsupported(op, other)),
    }
}

fn square_batches(op: &'static str, x: &NdTensor) -> Outcome<Batched> {
    let shape = x.shape();
    if shape.len() < 2 {
        return Err(OpError::invalid(
            op,
            format!("the input tensor must have at least 2 dimensions, got {}", shape.len()),
        ));
    }
    let (rows, cols) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    if rows != cols {
        return Err(OpError::invalid(
            op,
            format!("a must be batches of square matrices, but they are {rows} by {cols} matrices"),
        ));
    }
    let values = x.real_array(op)?.iter().copied().collect();
    Ok(Batched {
        batch: shape[..shape.len() - 2].to_vec(),
        n: rows,
        values,
    })
}

/// LU decomposition with partial pivoting; returns the determinant.
fn lu_det(mut m: Vec<f64>, n: usize) -> f64 {
    let mut det = 1.0;
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&a, &b| m[a * n + col].abs().total_cmp(&m[b * n + col].abs()))
            .unwrap_or(col);
        if m[pivot * n + col] == 0.0 {
            return 0.0;
        }
        if pivot != col {
            for j in 0..n {
                m.swap(col * n + j, pivot * n + j);
            }
            det = -det;
        }
        let p = m[col * n + col];
        det *= p;
        for row in col + 1..n {
            let factor = m[row * n + col] / p;
            for j in col..n {
                m[row * n + j] -= factor * m[col * n + j];
            }
        }
    }
    det
}

/// Solves `a * x = b` in place for `k` right-hand sides. `None` when a
/// pivot is exactly zero.
fn gauss_solve(mut a: Vec<f64>, mut b: Vec<f64>, n: usize, k: usize) -> Option<Vec<f64>> {
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| a[x * n + col].abs().total_cmp(&a[y * n + col].abs()))
            .unwrap_or(col);
        if a[pivot * n + col] == 0.0 {
            return None;
        }
        if pivot != col {
            for j in 0..n {
                a.swap(col * n + j, pivot * n + j);
            }
            for j in 0..k {
                b.swap(col * k + j, pivot * k + j);
            }
        }
        let p = a[col * n + col];
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col] / p;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[row * n + j] -= factor * a[col * n + j];
            }
            for j in 0..k {
                b[row * k + j] -= factor * b[col * k + j];
            }
        }
    }
    for row in 0..n {
        let p = a[row * n + row];
        for j in 0..k {
            b[row * k + j] /= p;
        }
    }
    Some(b)
}

fn identity(n: usize) -> Vec<f64> {
    let mut m = vec![0.0; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    m
}

fn batched_matmul<T: Copy>(
    a: &ArrayD<T>,
    b: &ArrayD<T>,
    zero: T,
    madd: impl Fn(T, T, T) -> T,
) -> Outcome<ArrayD<T>> {
    let (a_vec, b_vec) = (a.ndim() == 1, b.ndim() == 1);
    let lhs = if a_vec { a.clone().insert_axis(Axis(0)) } else { a.clone() };
    let rhs = if b_vec { b.clone().insert_axis(Axis(1)) } else { b.clone() };
    let (la, lb) = (lhs.ndim(), rhs.ndim());
    let (n, k) = (lhs.shape()[la - 2], lhs.shape()[la - 1]);
    let (k2, m) = (rhs.shape()[lb - 2], rhs.shape()[lb - 1]);
    let mismatch = || OpError::shape_mismatch("matmul", a.shape(), b.shape());
    if k != k2 {
        return Err(mismatch());
    }
    let batch = broadcast_shape(&lhs.shape()[..la - 2], &rhs.shape()[..lb - 2]).ok_or_else(mismatch)?;

    let expand = |x: &ArrayD<T>, rows: usize, cols: usize| -> Outcome<Vec<T>> {
        let mut shape = batch.clone();
        shape.extend([rows, cols]);
        let view = x.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
        Ok(view.iter().copied().collect())
    };
    let av = expand(&lhs, n, k)?;
    let bv = expand(&rhs, k, m)?;

    let batches: usize = batch.iter().product();
    let mut out = Vec::with_capacity(batches * n * m);
    for bi in 0..batches {
        let (ao, bo) = (bi * n * k, bi * k * m);
        for i in 0..n {
            for j in 0..m {
                let mut acc = zero;
                for p in 0..k {
                    acc = madd(acc, av[ao + i * k + p], bv[bo + p * m + j]);
                }
                out.push(acc);
            }
        }
    }

    let mut shape = batch;
    if !a_vec {
        shape.push(n);
    }
    if !b_vec {
        shape.push(m);
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), out)?)
}

impl NdRuntime {
    /// `torch.matmul` semantics: dot, matrix-vector, matrix-matrix and
    /// broadcast batched products.
    pub fn matmul(&self, a: &NdTensor, b: &NdTensor) -> Outcome<NdTensor> {
        if a.ndim() == 0 || b.ndim() == 0 {
            return Err(OpError::invalid(
                "matmul",
                "both arguments to matmul need to be at least 1D",
            ));
        }
        if a.dtype() != b.dtype() {
            return Err(OpError::invalid(
                "matmul",
                format!("expected both inputs to have the same dtype, but got {} and {}", a.dtype(), b.dtype()),
            ));
        }
        match (a.storage(), b.storage()) {
            (Storage::Float(x), Storage::Float(y)) => {
                let out = batched_matmul(x, y, 0.0, |acc, p, q| acc + p * q)?;
                NdTensor::float(a.dtype(), out)
            }
            (Storage::Int(x), Storage::Int(y)) => {
                let out = batched_matmul(x, y, 0i64, |acc, p, q| acc.wrapping_add(p.wrapping_mul(q)))?;
                NdTensor::int(a.dtype(), out)
            }
            _ => Err(OpError::unsupported("matmul", a.dtype())),
        }
    }

    /// Sum of the main diagonal of a 2-D tensor.
    pub fn trace(&self, x: &NdTensor) -> Outcome<NdTensor> {
        if x.ndim() != 2 {
            return Err(OpError::invalid("trace", "expected a matrix"));
        }
        let diag = |i: usize| [i, i];
        let len = x.shape()[0].min(x.shape()[1]);
        match x.storage() {
            Storage::Float(a) => {
                let total = self.accumulate((0..len).map(|i| a[diag(i)]));
                NdTensor::float(x.dtype(), ArrayD::from_elem(IxDyn(&[]), total))
            }
            Storage::Int(a) => {
                let total = (0..len).fold(0i64, |acc, i| acc.wrapping_add(a[diag(i)]));
                NdTensor::int(DType::I64, ArrayD::from_elem(IxDyn(&[]), total))
            }
            Storage::Bool(a) => {
                let total = (0..len).filter(|&i| a[diag(i)]).count() as i64;
                NdTensor::int(DType::I64, ArrayD::from_elem(IxDyn(&[]), total))
            }
            Storage::Complex(_) => Err(OpError::unsupported("trace", x.dtype())),
        }
    }

    pub fn det(&self, x: &NdTensor) -> Outcome<NdTensor> {
        linalg_dtype("det", x)?;
        let m = square_batches("det", x)?;
        let dets: Vec<f64> = (0..m.count()).map(|i| lu_det(m.matrix(i), m.n)).collect();
        NdTensor::float(x.dtype(), ArrayD::from_shape_vec(IxDyn(&m.batch), dets)?)
    }

    pub fn inv(&self, x: &NdTensor) -> Outcome<NdTensor> {
        linalg_dtype("inv", x)?;
        let m = square_batches("inv", x)?;
        let mut values = Vec::with_capacity(m.values.len());
        for i in 0..m.count() {
            let inverse = gauss_solve(m.matrix(i), identity(m.n), m.n, m.n)
                .ok_or(OpError::Expected(LibraryError::Singular { op: "inv" }))?;
            values.extend(inverse);
        }
        NdTensor::float(x.dtype(), ArrayD::from_shape_vec(IxDyn(&m.shape()), values)?)
    }

    /// Solves `a x = b` for a square matrix `a` and a vector or matrix `b`.
    pub fn solve(&self, a: &NdTensor, b: &NdTensor) -> Outcome<NdTensor> {
        linalg_dtype("solve", a)?;
        linalg_dtype("solve", b)?;
        if a.dtype() != b.dtype() {
            return Err(OpError::invalid("solve", "expected a and b to have the same dtype"));
        }
        if a.ndim() != 2 {
            return Err(OpError::invalid("solve", "a must be a matrix"));
        }
        let m = square_batches("solve", a)?;
        let k = match b.shape() {
            [rows] if *rows == m.n => 1,
            [rows, cols] if *rows == m.n => *cols,
            _ => return Err(OpError::shape_mismatch("solve", a.shape(), b.shape())),
        };
        let rhs: Vec<f64> = b.real_array("solve")?.iter().copied().collect();
        let solution = gauss_solve(m.matrix(0), rhs, m.n, k)
            .ok_or(OpError::Expected(LibraryError::Singular { op: "solve" }))?;
        NdTensor::float(a.dtype(), ArrayD::from_shape_vec(IxDyn(b.shape()), solution)?)
    }

    /// Integer power of square matrices. Negative powers invert first and
    /// need a float input.
    pub fn matrix_power(&self, x: &NdTensor, n: i64) -> Outcome<NdTensor> {
        let m = square_batches("matrix_power", x)?;
        if n < 0 && !matches!(x.dtype(), DType::F32 | DType::F64) {
            return Err(OpError::invalid(
                "matrix_power",
                format!("negative powers require a floating point input, got {}", x.dtype()),
            ));
        }
        if !matches!(x.storage(), Storage::Float(_) | Storage::Int(_)) {
            return Err(OpError::unsupported("matrix_power", x.dtype()));
        }

        if n == 0 {
            let values: Vec<f64> = (0..m.count()).flat_map(|_| identity(m.n)).collect();
            let eye = ArrayD::from_shape_vec(IxDyn(&m.shape()), values)?;
            return NdTensor::float(DType::F64, eye)?.to_dtype(x.dtype());
        }

        let mut base = if n < 0 { self.inv(x)? } else { x.clone() };
        let mut exp = n.unsigned_abs();
        let mut acc: Option<NdTensor> = None;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = Some(match acc {
                    Some(a) => self.matmul(&a, &base)?,
                    None => base.clone(),
                });
            }
            exp >>= 1;
            if exp > 0 {
                base = self.matmul(&base, &base)?;
            }
        }
        acc.ok_or_else(|| OpError::Unexpected("matrix_power produced no result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mat(shape: &[usize], values: Vec<f64>) -> NdTensor {
        NdTensor::from_vec(DType::F64, shape, values).unwrap()
    }

    fn flat(t: &NdTensor) -> Vec<f64> {
        t.float_array("t").unwrap().iter().copied().collect()
    }

    #[test]
    fn test_matmul_shapes() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let v = mat(&[3], vec![1.0, 0.0, -1.0]);
        let out = rt.matmul(&a, &v).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(flat(&out), vec![-2.0, -2.0]);

        let dot = rt.matmul(&v, &v).unwrap();
        assert!(dot.shape().is_empty());
        assert_eq!(flat(&dot), vec![2.0]);

        let batched = mat(&[4, 3, 2], vec![1.0; 24]);
        assert_eq!(rt.matmul(&a, &batched).unwrap().shape(), &[4, 2, 2]);
    }

    #[test]
    fn test_matmul_errors() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 3], vec![0.0; 6]);
        assert!(rt.matmul(&a, &a).unwrap_err().is_expected());
        let scalar = mat(&[], vec![1.0]);
        assert!(rt.matmul(&scalar, &a).unwrap_err().is_expected());
        let f32s = a.to_dtype(DType::F32).unwrap();
        assert!(rt.matmul(&a, &f32s).unwrap_err().is_expected());
    }

    #[test]
    fn test_matmul_ints_wrap() {
        let rt = NdRuntime::default();
        let a = mat(&[1, 1], vec![100.0]).to_dtype(DType::I8).unwrap();
        let out = rt.matmul(&a, &a).unwrap();
        match out.storage() {
            Storage::Int(v) => assert_eq!(v.iter().copied().collect::<Vec<_>>(), vec![16]),
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn test_det_and_inv() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 2], vec![4.0, 7.0, 2.0, 6.0]);
        assert!((flat(&rt.det(&a).unwrap())[0] - 10.0).abs() < 1e-12);
        let inv = rt.inv(&a).unwrap();
        let expected = [0.6, -0.7, -0.2, 0.4];
        for (got, want) in flat(&inv).iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_inv_singular_is_expected() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 2], vec![1.0, 2.0, 2.0, 4.0]);
        let err = rt.inv(&a).unwrap_err();
        assert!(matches!(err, OpError::Expected(LibraryError::Singular { .. })));
        assert_eq!(flat(&rt.det(&a).unwrap()), vec![0.0]);
    }

    #[test]
    fn test_non_square_rejected() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 3], vec![0.0; 6]);
        assert!(rt.det(&a).unwrap_err().is_expected());
        let ints = mat(&[2, 2], vec![0.0; 4]).to_dtype(DType::I32).unwrap();
        assert!(rt.inv(&ints).unwrap_err().is_expected());
    }

    #[test]
    fn test_solve() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 2], vec![2.0, 1.0, 1.0, 3.0]);
        let b = mat(&[2], vec![3.0, 5.0]);
        let x = flat(&rt.solve(&a, &b).unwrap());
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_power() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 2], vec![1.0, 1.0, 0.0, 1.0]);
        assert_eq!(flat(&rt.matrix_power(&a, 3).unwrap()), vec![1.0, 3.0, 0.0, 1.0]);
        assert_eq!(flat(&rt.matrix_power(&a, 0).unwrap()), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(flat(&rt.matrix_power(&a, -2).unwrap()), vec![1.0, -2.0, 0.0, 1.0]);
        let ints = a.to_dtype(DType::I64).unwrap();
        assert!(rt.matrix_power(&ints, -1).unwrap_err().is_expected());
    }

    #[test]
    fn test_trace() {
        let rt = NdRuntime::default();
        let a = mat(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(flat(&rt.trace(&a).unwrap()), vec![6.0]);
        assert!(rt.trace(&mat(&[3], vec![0.0; 3])).unwrap_err().is_expected());
    }
}
