//! Post-mortem artefacts for interesting inputs.
//!
//! Everything here is best effort: a failure to write a log never changes
//! what the driver reports to the fuzzing engine.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::runtime::NdTensor;
use crate::utils::{current_timestamp, fingerprint, sanitized_timestamp};

const SEPARATOR: &[u8] = b"\n-----\n";

/// Writes `error.log`, `error_inputs.log` and `diff_inputs/*.bin` under one
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triage {
    dir: PathBuf,
}

impl Triage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.dir.join("error.log")
    }

    pub fn error_inputs_path(&self) -> PathBuf {
        self.dir.join("error_inputs.log")
    }

    pub fn diff_inputs_dir(&self) -> PathBuf {
        self.dir.join("diff_inputs")
    }

    fn append_framed(&self, path: &Path, body: &[u8]) {
        let result = fs::create_dir_all(&self.dir).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let mut record = format!("Timestamp: {}\n", current_timestamp()).into_bytes();
            record.extend_from_slice(body);
            record.extend_from_slice(SEPARATOR);
            file.write_all(&record)
        });
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write triage log");
        }
    }

    /// Appends a timestamped message to `error.log`.
    pub fn log_error_message(&self, message: &str) {
        self.append_framed(&self.error_log_path(), message.as_bytes());
    }

    /// Appends the raw input, timestamped, to `error_inputs.log`.
    pub fn save_error_input(&self, data: &[u8]) {
        self.append_framed(&self.error_inputs_path(), data);
    }

    /// Writes `data` to its own file under `diff_inputs/` and returns the path.
    pub fn save_diff_input(&self, data: &[u8]) -> Option<PathBuf> {
        let dir = self.diff_inputs_dir();
        let path = dir.join(format!(
            "input_{}_{:08x}.bin",
            sanitized_timestamp(),
            fingerprint(data)
        ));
        match fs::create_dir_all(&dir).and_then(|_| fs::write(&path, data)) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "saved differing input");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to save differing input");
                None
            }
        }
    }

    /// Checks that two results agree in shape, dtype and value. Mismatches
    /// are logged and the input is saved for later replay.
    pub fn compare_tensors(
        &self,
        a: &NdTensor,
        b: &NdTensor,
        data: &[u8],
        rtol: f64,
        atol: f64,
    ) -> bool {
        if a.shape() != b.shape() {
            let message = format!("Shape mismatch: {:?} vs {:?}", a.shape(), b.shape());
            tracing::warn!("{message}");
            self.log_error_message(&message);
            self.save_diff_input(data);
            return false;
        }
        if a.dtype() != b.dtype() {
            let message = format!("Dtype mismatch: {} vs {}", a.dtype(), b.dtype());
            tracing::warn!("{message}");
            self.log_error_message(&message);
            self.save_diff_input(data);
            return false;
        }
        if a.allclose(b, rtol, atol) {
            return true;
        }
        let diff = a.max_abs_diff(b).unwrap_or(f64::NAN);
        let message = format!("Tensors differ: max absolute difference {diff}");
        tracing::warn!(max_abs_diff = diff, "tensors differ");
        self.log_error_message(&message);
        self.save_diff_input(data);
        false
    }
}
