//! Byte canonicalization between explorer output and verifier input.
//!
//! Explorers print hashes in reversed (display) order while the verifier consumes the
//! natural wire order. Counts in the proof blob use Bitcoin compact-size integers.

use crate::{
    constants::MAX_COMPACT_SIZE,
    error::{ProofError, ProofResult},
};

/// Strips a leading `0x` if present.
pub fn strip_hex_prefix(hex: &str) -> &str {
    hex.strip_prefix("0x").unwrap_or(hex)
}

/// Prepends `0x` when `prefixed` is set.
pub fn hex_string(hex: &str, prefixed: bool) -> String {
    if prefixed {
        format!("0x{}", strip_hex_prefix(hex))
    } else {
        strip_hex_prefix(hex).to_string()
    }
}

/// Decodes a hex string, accepting an optional `0x` prefix.
pub fn decode_hex(hex: &str) -> ProofResult<Vec<u8>> {
    Ok(hex::decode(strip_hex_prefix(hex))?)
}

/// Reverses the byte order inside every `word_size`-byte word of `hex`.
///
/// Words keep their original order; only the bytes within each word are flipped.
/// With `word_size = 32` this converts a list of explorer hashes to natural order.
pub fn reverse_words(hex: &str, word_size: usize) -> ProofResult<String> {
    if word_size == 0 {
        return Err(ProofError::ValueRange("word size must be positive".into()));
    }
    let hex = strip_hex_prefix(hex);
    if hex.len() % (word_size * 2) != 0 {
        return Err(ProofError::MalformedInput(format!(
            "hex length {} is not a multiple of {}",
            hex.len(),
            word_size * 2
        )));
    }
    let mut bytes = hex::decode(hex)?;
    for word in bytes.chunks_mut(word_size) {
        word.reverse();
    }
    Ok(hex::encode(bytes))
}

/// Encodes `n` as Bitcoin CompactSize and appends to `buf`.
/// 0–252: 1 byte; 253–0xFFFF: 0xFD + 2B LE; 0x10000–0xFFFFFFFF: 0xFE + 4B LE; else 0xFF + 8B LE.
pub fn write_compact_size(buf: &mut Vec<u8>, n: u64) -> ProofResult<()> {
    if n > MAX_COMPACT_SIZE {
        return Err(ProofError::ValueRange(format!(
            "{n} exceeds compact size limit {MAX_COMPACT_SIZE}"
        )));
    }
    if n <= 0xfc {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
    Ok(())
}

/// Hex form of [`write_compact_size`].
pub fn encode_compact_size(n: u64) -> ProofResult<String> {
    let mut buf = Vec::with_capacity(9);
    write_compact_size(&mut buf, n)?;
    Ok(hex::encode(buf))
}

/// Decodes a CompactSize from the start of `data`.
/// Returns `Some((value, num_bytes_consumed))` or `None` if insufficient bytes.
pub fn read_compact_size(data: &[u8]) -> Option<(u64, usize)> {
    let (&marker, rest) = data.split_first()?;
    match marker {
        0xfd => {
            let bytes: [u8; 2] = rest.get(..2)?.try_into().ok()?;
            Some((u16::from_le_bytes(bytes) as u64, 3))
        }
        0xfe => {
            let bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
            Some((u32::from_le_bytes(bytes) as u64, 5))
        }
        0xff => {
            let bytes: [u8; 8] = rest.get(..8)?.try_into().ok()?;
            Some((u64::from_le_bytes(bytes), 9))
        }
        n => Some((n as u64, 1)),
    }
}
