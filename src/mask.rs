/// XOR a buffer with a 4-byte masking key, as defined in
/// [RFC 6455 §5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3):
/// `octet[i] ^= key[i mod 4]`.
///
/// Masking is an involution: applying the same key twice restores the
/// original bytes, so this one routine serves both directions. Frames are
/// masked whole here, so the key never has to be rotated against a partial
/// offset. The key-aligned chunking keeps the loop free of index
/// arithmetic and vectorizes well, which is as much optimization as
/// payload masking needs at this crate's scale.
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        for (byte, key) in chunk.iter_mut().zip(mask) {
            *byte ^= key;
        }
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}
