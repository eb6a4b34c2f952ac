// XOR masking for client-to-server payloads.

/// Masks or unmasks `buf` in place with `mask`: `buf[i] ^= mask[i % 4]`.
///
/// Applying the same key twice restores the original bytes.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    if buf.len() < 16 {
        apply_mask_fallback(buf, mask);
    } else {
        apply_mask_fast64(buf, mask);
    }
}

/// Byte-at-a-time masking.
#[inline(always)]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Masks eight bytes per step. Each chunk starts at a multiple of eight so
/// the key phase is the same for every word.
#[doc(hidden)]
#[inline]
pub fn apply_mask_fast64(buf: &mut [u8], mask: [u8; 4]) {
    let mut wide = [0u8; 8];
    wide[..4].copy_from_slice(&mask);
    wide[4..].copy_from_slice(&mask);
    let mask_u64 = u64::from_ne_bytes(wide);

    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ mask_u64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // the tail starts at a multiple of eight, so key phase is zero
    apply_mask_fallback(chunks.into_remainder(), mask);
}
