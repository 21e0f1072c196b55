//! The generic "decode, call, classify" driver every target runs under.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use crate::cursor::ByteCursor;
use crate::decoder::Decoder;
use crate::error::{OpError, Outcome};
use crate::models::{DecodeLimits, Tensor};
use crate::runtime::{NdRuntime, NdTensor};
use crate::triage::Triage;

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;
pub const TRIAGE_DIR_ENV: &str = "TENSORFUZZ_TRIAGE_DIR";
pub const PROGRESS_INTERVAL_ENV: &str = "TENSORFUZZ_PROGRESS_INTERVAL";

/// What the fuzzing engine is told about one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Ran to completion or was rejected by the runtime as invalid.
    Keep,
    /// Hit an unexpected error; the input is a reproducer.
    Discard,
}

impl Status {
    /// libFuzzer return code.
    pub fn code(&self) -> i32 {
        match self {
            Status::Keep => 0,
            Status::Discard => -1,
        }
    }
}

/// One fuzz target: a name plus a body that decodes its arguments from the
/// input and calls into the runtime.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub name: &'static str,
    pub summary: &'static str,
    /// Inputs shorter than this are kept without running the body.
    pub min_size: usize,
    pub run: fn(&mut Case<'_>) -> Outcome<()>,
}

/// State handed to a target body for one input.
pub struct Case<'a> {
    pub cursor: ByteCursor<'a>,
    pub runtime: &'a mut NdRuntime,
    decoder: Decoder,
    triage: Option<&'a Triage>,
}

impl<'a> Case<'a> {
    pub fn new(data: &'a [u8], runtime: &'a mut NdRuntime, limits: DecodeLimits) -> Self {
        Self {
            cursor: ByteCursor::new(data),
            runtime,
            decoder: Decoder::new(limits),
            triage: None,
        }
    }

    pub fn with_triage(mut self, triage: Option<&'a Triage>) -> Self {
        self.triage = triage;
        self
    }

    pub fn input(&self) -> &'a [u8] {
        self.cursor.input()
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.decoder.limits
    }

    /// Decodes the next payload. Decoder failures are unexpected.
    pub fn payload(&mut self) -> Outcome<Tensor> {
        Ok(self.decoder.tensor(&mut self.cursor)?)
    }

    /// Decodes the next payload and converts it into a runtime tensor.
    pub fn tensor(&mut self) -> Outcome<NdTensor> {
        NdTensor::from_payload(&self.payload()?)
    }

    /// Decodes another tensor only if at least `min_remaining` bytes are left.
    pub fn tensor_if(&mut self, min_remaining: usize) -> Outcome<Option<NdTensor>> {
        match self.decoder.tensor_if(&mut self.cursor, min_remaining)? {
            Some(payload) => Ok(Some(NdTensor::from_payload(&payload)?)),
            None => Ok(None),
        }
    }

    /// Diagnostic comparison of two results that should agree. Never fails
    /// the case.
    pub fn agree(&self, what: &str, a: &NdTensor, b: &NdTensor, rtol: f64, atol: f64) -> bool {
        let ok = match self.triage {
            Some(triage) => triage.compare_tensors(a, b, self.input(), rtol, atol),
            None => a.shape() == b.shape() && a.dtype() == b.dtype() && a.allclose(b, rtol, atol),
        };
        if !ok {
            tracing::warn!(check = what, "results disagree");
        }
        ok
    }

    /// Diagnostic invariant check. Never fails the case.
    pub fn check(&self, what: &str, holds: bool) -> bool {
        if !holds {
            tracing::warn!(check = what, "invariant violated");
            if let Some(triage) = self.triage {
                triage.log_error_message(&format!("Check failed: {what}"));
            }
        }
        holds
    }
}

/// Driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub limits: DecodeLimits,
    /// Log progress every this many iterations; 0 disables it.
    pub progress_interval: u64,
    /// Turn panics in a target body into unexpected errors. Off for fuzzing
    /// so the engine sees the crash.
    pub catch_panics: bool,
    pub triage: Option<Triage>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            limits: DecodeLimits::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            catch_panics: false,
            triage: None,
        }
    }
}

impl DriverConfig {
    /// Defaults overridden by `TENSORFUZZ_TRIAGE_DIR` and
    /// `TENSORFUZZ_PROGRESS_INTERVAL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(TRIAGE_DIR_ENV).filter(|d| !d.is_empty()) {
            config.triage = Some(Triage::new(PathBuf::from(dir)));
        }
        if let Ok(raw) = std::env::var(PROGRESS_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(interval) => config.progress_interval = interval,
                Err(e) => tracing::warn!(value = %raw, error = %e, "ignoring invalid progress interval"),
            }
        }
        config
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }

    pub fn with_triage(mut self, triage: Option<Triage>) -> Self {
        self.triage = triage;
        self
    }
}

/// Runs targets against inputs and classifies the outcome.
///
/// # Examples
///
/// ```
/// use tensorfuzz::harness::{Driver, DriverConfig, Status};
/// use tensorfuzz::targets;
///
/// let mut driver = Driver::new(DriverConfig::default());
/// let target = targets::find("decode").unwrap();
/// assert_eq!(driver.run(target, &[0, 0]), Status::Keep);
/// assert_eq!(driver.iterations(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Driver {
    config: DriverConfig,
    runtime: NdRuntime,
    iterations: u64,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            runtime: NdRuntime::default(),
            iterations: 0,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn runtime(&self) -> &NdRuntime {
        &self.runtime
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Runs `target` on `data` and returns the raw outcome. Short inputs
    /// succeed without running the body.
    pub fn execute(&mut self, target: &Target, data: &[u8]) -> Outcome<()> {
        self.iterations += 1;
        let interval = self.config.progress_interval;
        if interval > 0 && self.iterations % interval == 0 {
            tracing::info!(iterations = self.iterations, target = target.name, "fuzzing progress");
        }

        if data.len() < target.min_size {
            return Ok(());
        }

        let mut case = Case::new(data, &mut self.runtime, self.config.limits)
            .with_triage(self.config.triage.as_ref());
        if !self.config.catch_panics {
            return (target.run)(&mut case);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| (target.run)(&mut case))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                Err(OpError::Unexpected(format!("panic: {message}")))
            }
        }
    }

    /// Runs `target` on `data` and tells the fuzzing engine what to do.
    pub fn run(&mut self, target: &Target, data: &[u8]) -> Status {
        match self.execute(target, data) {
            Ok(()) => Status::Keep,
            Err(OpError::Expected(e)) => {
                tracing::debug!(target = target.name, error = %e, "runtime rejected input");
                Status::Keep
            }
            Err(OpError::Unexpected(message)) => {
                tracing::warn!(target = target.name, error = %message, "unexpected failure");
                if let Some(triage) = &self.config.triage {
                    triage.log_error_message(&format!("Exception caught in {}: {message}", target.name));
                    triage.save_error_input(data);
                }
                Status::Discard
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_body(_: &mut Case<'_>) -> Outcome<()> {
        Err(OpError::invalid("body", "rejected"))
    }

    fn unexpected_body(_: &mut Case<'_>) -> Outcome<()> {
        Err(OpError::Unexpected("boom".into()))
    }

    fn panicking_body(_: &mut Case<'_>) -> Outcome<()> {
        panic!("kaboom")
    }

    fn decoding_body(case: &mut Case<'_>) -> Outcome<()> {
        case.tensor().map(|_| ())
    }

    fn target(run: fn(&mut Case<'_>) -> Outcome<()>, min_size: usize) -> Target {
        Target {
            name: "test",
            summary: "test body",
            min_size,
            run,
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Keep.code(), 0);
        assert_eq!(Status::Discard.code(), -1);
    }

    #[test]
    fn test_classification() {
        let mut driver = Driver::default();
        assert_eq!(driver.run(&target(expected_body, 0), &[1]), Status::Keep);
        assert_eq!(driver.run(&target(unexpected_body, 0), &[1]), Status::Discard);
        assert_eq!(driver.iterations(), 2);
    }

    #[test]
    fn test_short_input_skips_body() {
        let mut driver = Driver::default();
        assert_eq!(driver.run(&target(unexpected_body, 4), &[1, 2, 3]), Status::Keep);
        assert_eq!(driver.run(&target(unexpected_body, 4), &[1, 2, 3, 4]), Status::Discard);
    }

    #[test]
    fn test_decoder_error_discards() {
        let mut driver = Driver::default();
        // one byte cannot hold dtype and rank selectors
        assert_eq!(driver.run(&target(decoding_body, 0), &[7]), Status::Discard);
        assert_eq!(driver.run(&target(decoding_body, 0), &[0, 0]), Status::Keep);
    }

    #[test]
    fn test_caught_panic_is_unexpected() {
        let mut driver = Driver::new(DriverConfig::default().with_catch_panics(true));
        let err = driver.execute(&target(panicking_body, 0), &[]).unwrap_err();
        assert_eq!(err, OpError::Unexpected("panic: kaboom".into()));
    }

    #[test]
    fn test_unexpected_failure_is_triaged() {
        let dir = tempfile::tempdir().unwrap();
        let config = DriverConfig::default().with_triage(Some(Triage::new(dir.path())));
        let mut driver = Driver::new(config);
        driver.run(&target(unexpected_body, 0), b"input-bytes");
        let log = std::fs::read_to_string(dir.path().join("error.log")).unwrap();
        assert!(log.contains("Exception caught in test: boom"));
        let inputs = std::fs::read(dir.path().join("error_inputs.log")).unwrap();
        assert!(inputs.windows(11).any(|w| w == b"input-bytes"));
    }
}
