//! CBOR save/load for runtime tensors.

use serde::{Deserialize, Serialize};

use super::{NdRuntime, NdTensor};
use crate::error::{LibraryError, OpError, Outcome};
use crate::models::Tensor;
use crate::utils::fits_in_memory;

pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Archive {
    version: u32,
    tensor: Tensor,
}

fn malformed(reason: impl Into<String>) -> OpError {
    OpError::Expected(LibraryError::MalformedArchive(reason.into()))
}

impl NdRuntime {
    /// Serializes `x` into a self-describing CBOR archive.
    pub fn save(&self, x: &NdTensor) -> Outcome<Vec<u8>> {
        let archive = Archive {
            version: ARCHIVE_VERSION,
            tensor: x.to_payload(),
        };
        let mut out = Vec::new();
        ciborium::into_writer(&archive, &mut out)
            .map_err(|e| OpError::Unexpected(format!("failed to encode archive: {e}")))?;
        Ok(out)
    }

    /// Reads an archive written by [`NdRuntime::save`]. Arbitrary bytes are
    /// rejected with [`LibraryError::MalformedArchive`].
    pub fn load(&self, bytes: &[u8]) -> Outcome<NdTensor> {
        let archive: Archive = ciborium::from_reader(bytes).map_err(|e| malformed(e.to_string()))?;
        if archive.version != ARCHIVE_VERSION {
            return Err(malformed(format!("unsupported archive version {}", archive.version)));
        }
        let tensor = archive.tensor;
        if !fits_in_memory(&tensor.shape) {
            return Err(malformed(format!("shape {:?} does not fit in memory", tensor.shape)));
        }
        if tensor.shape.iter().any(|&d| d < 0) || !tensor.is_consistent() {
            return Err(malformed(format!(
                "payload of {} bytes does not match shape {:?} of {}",
                tensor.data.len(),
                tensor.shape,
                tensor.dtype
            )));
        }
        NdTensor::from_payload(&tensor)
    }
}
