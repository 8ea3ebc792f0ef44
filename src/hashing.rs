// src/hashing.rs

//! Seeded, deterministic content fingerprints.
//!
//! Two non-cryptographic primitives back the incremental-rebuild engine: a
//! 128-bit stream hash for file contents and a 32-bit string hash used to
//! namespace the on-disk history file per build script. Determinism (same
//! bytes + same seed => same value) is the only contract; nothing outside a
//! running pipewright process ever interprets these values, so there is no
//! claim of bit-compatibility with any reference algorithm.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::errors::Result;

const C1: u32 = 0x239b_961b;
const C2: u32 = 0xab0e_9789;
const C3: u32 = 0x38b3_4ae5;
const C4: u32 = 0xa1e3_8b93;

/// 128-bit fingerprint produced by [`hash_stream`].
///
/// Displays as 32 lowercase hex digits; history entries store that string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest128 {
    lanes: [u32; 4],
}

impl fmt::Display for Digest128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lane in self.lanes {
            write!(f, "{lane:08x}")?;
        }
        Ok(())
    }
}

/// Fingerprint a byte stream with a four-lane mix-and-rotate construction.
///
/// The stream is consumed in 16-byte blocks, one 32-bit word per lane, with
/// a length-dependent tail for the final partial block and an avalanche
/// finalization pass over each lane.
pub fn hash_stream<R: Read>(mut reader: R, seed: u32) -> Result<Digest128> {
    let mut h = [seed; 4];
    let mut total: u32 = 0;
    let mut block = [0u8; 16];

    loop {
        let n = read_block(&mut reader, &mut block)?;
        total = total.wrapping_add(n as u32);

        if n == 16 {
            let k = [
                u32::from_le_bytes([block[0], block[1], block[2], block[3]]),
                u32::from_le_bytes([block[4], block[5], block[6], block[7]]),
                u32::from_le_bytes([block[8], block[9], block[10], block[11]]),
                u32::from_le_bytes([block[12], block[13], block[14], block[15]]),
            ];

            h[0] ^= mix(k[0], C1, 15, C2);
            h[0] = h[0]
                .rotate_left(19)
                .wrapping_add(h[1])
                .wrapping_mul(5)
                .wrapping_add(0x561c_cd1b);
            h[1] ^= mix(k[1], C2, 16, C3);
            h[1] = h[1]
                .rotate_left(17)
                .wrapping_add(h[2])
                .wrapping_mul(5)
                .wrapping_add(0x0bca_a747);
            h[2] ^= mix(k[2], C3, 17, C4);
            h[2] = h[2]
                .rotate_left(15)
                .wrapping_add(h[3])
                .wrapping_mul(5)
                .wrapping_add(0x96cd_1c35);
            h[3] ^= mix(k[3], C4, 18, C1);
            h[3] = h[3]
                .rotate_left(13)
                .wrapping_add(h[0])
                .wrapping_mul(5)
                .wrapping_add(0x32ac_3b17);
        } else {
            tail(&block[..n], &mut h);
            break;
        }
    }

    Ok(finalize(h, total))
}

/// Fingerprint a file's contents. Convenience wrapper over [`hash_stream`].
pub fn hash_file(path: &Path, seed: u32) -> Result<Digest128> {
    let file = File::open(path)?;
    hash_stream(BufReader::new(file), seed)
}

/// 32-bit string fingerprint over UTF-16 code units.
///
/// Single-lane construction: code-unit pairs form 4-byte words, an odd
/// trailing unit feeds the tail, and the result goes through the same
/// avalanche mix as the stream hash. Only ever consumed by the process that
/// produced it (history file naming, stage identities).
pub fn hash_str(input: &str, seed: u32) -> u32 {
    const K1: u32 = 0xcc9e_2d51;
    const K2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut units: u32 = 0;

    let mut pending: Option<u16> = None;
    for unit in input.encode_utf16() {
        units += 1;
        match pending.take() {
            None => pending = Some(unit),
            Some(low) => {
                let word = (low as u32) | ((unit as u32) << 16);
                h ^= mix(word, K1, 15, K2);
                h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
            }
        }
    }
    if let Some(last) = pending {
        h ^= mix(last as u32, K1, 15, K2);
    }

    h ^= units.wrapping_mul(2);
    fmix(h)
}

fn mix(k: u32, mul_in: u32, rot: u32, mul_out: u32) -> u32 {
    k.wrapping_mul(mul_in).rotate_left(rot).wrapping_mul(mul_out)
}

/// Fold the final partial block (0..=15 bytes) into the lanes. Each lane
/// covers four bytes of the block and is only touched when the tail reaches
/// into it.
fn tail(chunk: &[u8], h: &mut [u32; 4]) {
    let mut k = [0u32; 4];
    for (i, &byte) in chunk.iter().enumerate() {
        k[i / 4] |= (byte as u32) << ((i % 4) * 8);
    }

    if chunk.len() > 12 {
        h[3] ^= mix(k[3], C4, 18, C1);
    }
    if chunk.len() > 8 {
        h[2] ^= mix(k[2], C3, 17, C4);
    }
    if chunk.len() > 4 {
        h[1] ^= mix(k[1], C2, 16, C3);
    }
    if !chunk.is_empty() {
        h[0] ^= mix(k[0], C1, 15, C2);
    }
}

fn finalize(mut h: [u32; 4], len: u32) -> Digest128 {
    for lane in &mut h {
        *lane ^= len;
    }

    cross_add(&mut h);
    for lane in &mut h {
        *lane = fmix(*lane);
    }
    cross_add(&mut h);

    Digest128 { lanes: h }
}

fn cross_add(h: &mut [u32; 4]) {
    h[0] = h[0]
        .wrapping_add(h[1])
        .wrapping_add(h[2])
        .wrapping_add(h[3]);
    h[1] = h[1].wrapping_add(h[0]);
    h[2] = h[2].wrapping_add(h[0]);
    h[3] = h[3].wrapping_add(h[0]);
}

fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Fill `buf` from the reader, tolerating short reads. Returns the number
/// of bytes actually read; anything less than the buffer length means the
/// stream is exhausted.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8; 16]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(bytes: &[u8], seed: u32) -> String {
        hash_stream(bytes, seed).unwrap().to_string()
    }

    #[test]
    fn stream_hash_is_deterministic() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(digest(data, 144), digest(data, 144));
    }

    #[test]
    fn stream_hash_depends_on_seed() {
        let data = b"same bytes, different seed";
        assert_ne!(digest(data, 1), digest(data, 2));
    }

    #[test]
    fn stream_hash_detects_single_byte_change() {
        let a = b"0123456789abcdef0123456789abcdef".to_vec();
        let mut b = a.clone();
        b[17] ^= 0x01;
        assert_ne!(digest(&a, 144), digest(&b, 144));
    }

    #[test]
    fn stream_hash_tail_lengths_are_distinct() {
        // Exercise every tail shape around the 16-byte block boundary.
        let base: Vec<u8> = (0u8..64).collect();
        let mut seen = std::collections::HashSet::new();
        for len in [0, 1, 4, 5, 8, 9, 12, 13, 15, 16, 17, 31, 32, 33] {
            assert!(seen.insert(digest(&base[..len], 144)), "collision at len {len}");
        }
    }

    #[test]
    fn stream_hash_renders_32_hex_digits() {
        let hex = digest(b"abc", 144);
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn string_hash_is_deterministic_and_seeded() {
        assert_eq!(hash_str("build.rs", 7), hash_str("build.rs", 7));
        assert_ne!(hash_str("build.rs", 7), hash_str("build.rs", 8));
    }

    #[test]
    fn string_hash_handles_non_ascii_and_odd_lengths() {
        // Odd numbers of UTF-16 units hit the tail path.
        assert_ne!(hash_str("a", 7), hash_str("b", 7));
        assert_ne!(hash_str("héllo", 7), hash_str("hello", 7));
        assert_ne!(hash_str("", 7), hash_str("a", 7));
    }
}
