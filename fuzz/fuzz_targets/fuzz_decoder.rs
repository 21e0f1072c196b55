#![no_main]
use libfuzzer_sys::fuzz_target;
use tensorfuzz::{ByteCursor, DecodeLimits, Decoder};

fuzz_target!(|data: &[u8]| {
    let mut cursor = ByteCursor::new(data);
    let Some(&selector) = data.first() else {
        return;
    };
    // odd first byte: narrow limits
    let limits = if selector & 1 == 0 {
        DecodeLimits::default()
    } else {
        DecodeLimits::default().with_rank(0, 2).with_dims(0, 3)
    };
    let decoder = Decoder::new(limits);

    let before = cursor.offset();
    if let Ok(tensors) = decoder.tensors(&mut cursor, 8) {
        assert!(cursor.offset() >= before);
        assert!(cursor.offset() <= data.len());
        for tensor in &tensors {
            assert!(tensor.is_consistent());
            assert!(tensor.rank() <= limits.max_rank as usize);
            assert!(tensor.shape.iter().all(|d| (limits.min_dim..=limits.max_dim).contains(d)));
        }
    }
});
