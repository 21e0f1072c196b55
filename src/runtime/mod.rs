//! Tensor runtime the harnesses call into.
//!
//! Backed by `ndarray`. Every operator returns an [`Outcome`]: invalid
//! arguments come back as [`OpError::Expected`], anything that points at a
//! bug in the binding as [`OpError::Unexpected`].
//!
//! Process-wide knobs of a typical tensor library (thread count,
//! deterministic algorithms, default float dtype) live in an explicit
//! [`RuntimeConfig`] owned by the runtime. Harnesses that flip them do so
//! through [`NdRuntime::scoped`], which puts the previous values back when
//! the guard drops.

mod conv;
mod elementwise;
mod fft;
mod linalg;
mod loss;
mod norm;
mod pool;
mod quant;
mod reduce;
mod rnn;
mod serialize;
mod shape;
mod tensor;

use std::ops::{Deref, DerefMut};

use crate::error::{OpError, Outcome};
use crate::models::DType;

pub use conv::ConvParams;
pub use elementwise::{BinaryOp, UnaryOp};
pub use fft::FftNorm;
pub use loss::{Loss, Reduction};
pub use norm::{BatchNormParams, RunningStats};
pub use pool::PoolParams;
pub use quant::QTensor;
pub use reduce::{Interpolation, NormOrd, ReduceOp};
pub use rnn::CellWeights;
pub use serialize::ARCHIVE_VERSION;
pub use tensor::{NdTensor, Storage};

/// Library-level settings that operators consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of partial accumulators used by float reductions when
    /// `deterministic` is off.
    pub num_threads: usize,
    /// Forces sequential accumulation so results do not depend on
    /// `num_threads`.
    pub deterministic: bool,
    /// Dtype that integer and bool inputs are promoted to by float-only ops.
    pub default_float: DType,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            deterministic: false,
            default_float: DType::F32,
        }
    }
}

impl RuntimeConfig {
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_default_float(mut self, dtype: DType) -> Self {
        self.default_float = dtype;
        self
    }

    fn validate(&self) -> Outcome<()> {
        if self.num_threads == 0 {
            return Err(OpError::invalid(
                "set_num_threads",
                "number of threads must be positive",
            ));
        }
        if !self.default_float.is_float() {
            return Err(OpError::invalid(
                "set_default_dtype",
                format!("only floating-point types are supported as the default type, got {}", self.default_float),
            ));
        }
        Ok(())
    }
}

/// The ndarray-backed runtime.
#[derive(Debug, Default)]
pub struct NdRuntime {
    config: RuntimeConfig,
}

impl NdRuntime {
    pub fn new(config: RuntimeConfig) -> Outcome<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    pub fn set_num_threads(&mut self, num_threads: usize) -> Outcome<()> {
        let next = self.config.with_num_threads(num_threads);
        next.validate()?;
        self.config = next;
        Ok(())
    }

    pub fn set_deterministic(&mut self, deterministic: bool) {
        self.config.deterministic = deterministic;
    }

    pub fn set_default_float(&mut self, dtype: DType) -> Outcome<()> {
        let next = self.config.with_default_float(dtype);
        next.validate()?;
        self.config = next;
        Ok(())
    }

    /// Applies `config` until the returned guard drops.
    ///
    /// # Examples
    ///
    /// ```
    /// use tensorfuzz::runtime::{NdRuntime, RuntimeConfig};
    ///
    /// let mut rt = NdRuntime::default();
    /// {
    ///     let guard = rt.scoped(RuntimeConfig::default().with_num_threads(4))?;
    ///     assert_eq!(guard.num_threads(), 4);
    /// }
    /// assert_eq!(rt.num_threads(), 1);
    /// # Ok::<(), tensorfuzz::OpError>(())
    /// ```
    pub fn scoped(&mut self, config: RuntimeConfig) -> Outcome<ConfigGuard<'_>> {
        config.validate()?;
        let saved = std::mem::replace(&mut self.config, config);
        Ok(ConfigGuard {
            runtime: self,
            saved,
        })
    }

    /// Runs `f` under `config`, restoring the previous configuration on
    /// every exit path.
    pub fn with_config<T>(
        &mut self,
        config: RuntimeConfig,
        f: impl FnOnce(&mut NdRuntime) -> Outcome<T>,
    ) -> Outcome<T> {
        let mut guard = self.scoped(config)?;
        f(&mut guard)
    }

    /// Sums `values` the way the current configuration dictates.
    pub(crate) fn accumulate(&self, values: impl IntoIterator<Item = f64>) -> f64 {
        if self.config.deterministic || self.config.num_threads <= 1 {
            return values.into_iter().fold(0.0, |acc, v| acc + v);
        }
        let values: Vec<f64> = values.into_iter().collect();
        let chunk = values.len().div_ceil(self.config.num_threads).max(1);
        values
            .chunks(chunk)
            .map(|part| part.iter().fold(0.0, |acc, v| acc + v))
            .fold(0.0, |acc, v| acc + v)
    }
}

/// Restores the runtime's previous configuration on drop.
pub struct ConfigGuard<'a> {
    runtime: &'a mut NdRuntime,
    saved: RuntimeConfig,
}

impl Deref for ConfigGuard<'_> {
    type Target = NdRuntime;

    fn deref(&self) -> &NdRuntime {
        &*self.runtime
    }
}

impl DerefMut for ConfigGuard<'_> {
    fn deref_mut(&mut self) -> &mut NdRuntime {
        &mut *self.runtime
    }
}

impl Drop for ConfigGuard<'_> {
    fn drop(&mut self) {
        self.runtime.config = self.saved;
    }
}

/// Resolves a possibly negative `dim` against `ndim` the way torch does
/// (a scalar accepts `-1` and `0`).
pub(crate) fn wrap_dim(op: &'static str, dim: i64, ndim: usize) -> Outcome<usize> {
    let bound = ndim.max(1) as i64;
    let resolved = if dim < 0 { dim + bound } else { dim };
    if resolved < 0 || resolved >= bound {
        return Err(OpError::Expected(crate::error::LibraryError::DimOutOfRange {
            op,
            dim,
            ndim,
        }));
    }
    Ok(resolved as usize)
}
