//! Binary layout of the persisted vector file.
//!
//! ```text
//! magic "DQVX" | version u32 | dim u32 | count u64 | count*dim f32 | blake3(all preceding bytes)
//! ```
//!
//! All integers and floats are little-endian.

use docqa_core::{Error, Result};

const MAGIC: &[u8; 4] = b"DQVX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const DIGEST_LEN: usize = 32;

pub fn encode_vectors(dim: usize, data: &[f32]) -> Vec<u8> {
    let count = if dim == 0 { 0 } else { data.len() / dim };
    let mut bytes = Vec::with_capacity(HEADER_LEN + data.len() * 4 + DIGEST_LEN);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(dim as u32).to_le_bytes());
    bytes.extend_from_slice(&(count as u64).to_le_bytes());
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    let digest = blake3::hash(&bytes);
    bytes.extend_from_slice(digest.as_bytes());
    bytes
}

/// Returns `(dim, row-major values)`.
pub fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<f32>)> {
    if bytes.len() < HEADER_LEN + DIGEST_LEN {
        return Err(corrupt(format!("file too short ({} bytes)", bytes.len())));
    }
    if &bytes[..4] != MAGIC {
        return Err(corrupt("bad magic".to_string()));
    }
    let version = u32::from_le_bytes(read_array(&bytes[4..8]));
    if version != VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let dim = u32::from_le_bytes(read_array(&bytes[8..12])) as usize;
    let count = u64::from_le_bytes(read_array(&bytes[12..20]));
    if dim == 0 {
        return Err(corrupt("zero dimension".to_string()));
    }

    let payload_len = usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(dim))
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt(format!("implausible vector count {count}")))?;
    let expected = HEADER_LEN + payload_len + DIGEST_LEN;
    if bytes.len() != expected {
        return Err(corrupt(format!("expected {expected} bytes, found {}", bytes.len())));
    }

    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if blake3::hash(body).as_bytes() != digest {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    let data = body[HEADER_LEN..]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes(read_array(b)))
        .collect();
    Ok((dim, data))
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

fn corrupt(reason: String) -> Error {
    Error::PersistenceCorruption(format!("vector file: {reason}"))
}
