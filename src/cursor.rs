//! Offset-tracking view over a fuzz input.

use byteorder::{ByteOrder, LittleEndian};

/// Read-only byte buffer plus a forward-only offset.
///
/// Reads never go past the end: fixed-width reads return `None` and leave
/// the offset untouched when too few bytes remain, and [`ByteCursor::take_up_to`]
/// truncates.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Starts at `offset`, clamped to the buffer length.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            offset: offset.min(data.len()),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// The whole underlying input.
    pub fn input(&self) -> &'a [u8] {
        self.data
    }

    /// Unread bytes, without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    /// Moves the offset to the end of the buffer.
    pub fn skip_to_end(&mut self) {
        self.offset = self.data.len();
    }

    /// Consumes exactly `n` bytes, or nothing.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Some(slice)
    }

    /// Consumes up to `n` bytes.
    pub fn take_up_to(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        slice
    }

    /// Consumes everything left.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let slice = self.rest();
        self.skip_to_end();
        slice
    }

    // =========================================================================
    // SCALAR PARAMETERS
    // =========================================================================

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Low bit of the next byte.
    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b & 0x1 != 0)
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        self.take(8).map(LittleEndian::read_i64)
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.take(8).map(LittleEndian::read_u64)
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.take(8).map(LittleEndian::read_f64)
    }

    pub fn read_f32(&mut self) -> Option<f32> {
        self.take(4).map(LittleEndian::read_f32)
    }

    pub fn u8_or(&mut self, default: u8) -> u8 {
        self.read_u8().unwrap_or(default)
    }

    pub fn bool_or(&mut self, default: bool) -> bool {
        self.read_bool().unwrap_or(default)
    }

    pub fn i64_or(&mut self, default: i64) -> i64 {
        self.read_i64().unwrap_or(default)
    }

    pub fn f64_or(&mut self, default: f64) -> f64 {
        self.read_f64().unwrap_or(default)
    }

    /// One byte reduced modulo `n`; 0 when exhausted or `n == 0`.
    pub fn select(&mut self, n: usize) -> usize {
        match (self.read_u8(), n) {
            (Some(b), n) if n > 0 => b as usize % n,
            _ => 0,
        }
    }

    /// A value in `[0, 1)`: the fractional part of a finite `f64`'s
    /// magnitude, or `default` for NaN, infinities and exhausted input.
    pub fn unit_f64(&mut self, default: f64) -> f64 {
        match self.read_f64() {
            Some(raw) if raw.is_finite() => raw.abs().fract(),
            _ => default,
        }
    }

    /// A valid axis for a tensor of rank `ndim`, or `None` for scalars and
    /// exhausted input.
    pub fn dim_for(&mut self, ndim: usize) -> Option<usize> {
        if ndim == 0 {
            return None;
        }
        self.read_i64()
            .map(|raw| (raw.unsigned_abs() % ndim as u64) as usize)
    }

    /// Signed integer in `[min, max]`, or `default` when exhausted.
    pub fn int_in(&mut self, min: i64, max: i64, default: i64) -> i64 {
        let Some(byte) = self.read_u8() else {
            return default;
        };
        if max <= min {
            return min;
        }
        let span = (max - min + 1) as u64;
        min + (byte as u64 % span) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_all_or_nothing() {
        let data = [1u8, 2, 3];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.take(4), None);
        assert_eq!(c.offset(), 0);
        assert_eq!(c.take(2), Some(&data[..2]));
        assert_eq!(c.remaining(), 1);
    }

    #[test]
    fn test_take_up_to_truncates() {
        let data = [1u8, 2, 3];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.take_up_to(10), &data[..]);
        assert!(c.is_exhausted());
        assert_eq!(c.take_up_to(1), &[] as &[u8]);
    }

    #[test]
    fn test_read_little_endian() {
        let bytes = 0x0102_0304_0506_0708i64.to_le_bytes();
        let mut c = ByteCursor::new(&bytes);
        assert_eq!(c.read_i64(), Some(0x0102_0304_0506_0708));
        assert_eq!(c.read_u8(), None);
    }

    #[test]
    fn test_unit_f64() {
        let mut data = Vec::new();
        data.extend_from_slice(&(-2.25f64).to_le_bytes());
        data.extend_from_slice(&f64::NAN.to_le_bytes());
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.unit_f64(0.5), 0.25);
        assert_eq!(c.unit_f64(0.5), 0.5);
        assert_eq!(c.unit_f64(0.5), 0.5);
    }

    #[test]
    fn test_dim_for() {
        let bytes = (-7i64).to_le_bytes();
        let mut c = ByteCursor::new(&bytes);
        assert_eq!(c.clone().dim_for(0), None);
        assert_eq!(c.dim_for(3), Some(1));
    }

    #[test]
    fn test_int_in() {
        let data = [8u8];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.int_in(-2, 2, 9), 1);
        assert_eq!(c.int_in(-2, 2, 9), 9);
    }

    #[test]
    fn test_at_clamps() {
        let data = [0u8; 4];
        let c = ByteCursor::at(&data, 10);
        assert_eq!(c.offset(), 4);
        assert!(c.is_exhausted());
    }
}
