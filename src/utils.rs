//! Small helpers shared by the decoder, the runtime and triage.

/// Element count of `shape`, or `None` on a negative dimension or `i64`
/// overflow. The empty shape has one element.
pub fn checked_num_elements(shape: &[i64]) -> Option<i64> {
    let mut count: i64 = 1;
    for &dim in shape {
        if dim < 0 {
            return None;
        }
        count = count.checked_mul(dim)?;
    }
    Some(count)
}

/// Current local time as `YYYY-MM-DD HH:MM:SS`.
pub fn current_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Timestamp safe to embed in file names.
pub fn sanitized_timestamp() -> String {
    current_timestamp().replace(' ', "_").replace(':', "-")
}

/// CRC32C of the input, used to tell apart reproducers saved in the same second.
pub fn fingerprint(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Whether `shape` can back an in-memory array: every dimension is
/// non-negative and the product of the non-zero dimensions fits in
/// `isize`. A zero dimension does not excuse the others from the bound.
pub fn fits_in_memory(shape: &[i64]) -> bool {
    let mut extent: usize = 1;
    for &dim in shape {
        let Ok(dim) = usize::try_from(dim) else {
            return false;
        };
        match extent.checked_mul(dim.max(1)) {
            Some(next) if next <= isize::MAX as usize => extent = next,
            _ => return false,
        }
    }
    true
}
