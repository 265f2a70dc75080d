// Proof Constants
// ===============
//
// This module defines the fixed sizes and lattice defaults used while assembling
// inclusion proofs. The sizes come from the Bitcoin wire format; the defaults come
// from the deployed verifier configuration.

/// Size of a serialized block header
///
/// A Bitcoin block header is always 80 bytes on the wire: version (4), previous block
/// hash (32), merkle root (32), time (4), bits (4) and nonce (4).
pub const BLOCK_HEADER_BYTES: usize = 80;

/// Length of a block header in hex characters as returned by block explorers
pub const BLOCK_HEADER_HEX_LEN: usize = BLOCK_HEADER_BYTES * 2;

/// Size of a double-SHA256 hash (txid, block hash, merkle node)
pub const HASH_BYTES: usize = 32;

/// Number of blocks in a difficulty adjustment epoch
///
/// The verifier contract is seeded with the timestamp of the first block of the epoch
/// containing the initial checkpoint so it can validate the next retarget.
pub const EPOCH_BLOCK_COUNT: u64 = 2016;

/// Default distance between two checkpoint heights
pub const DEFAULT_STEP: u64 = 10;

/// Default number of blocks the header chain must extend past the last transaction
///
/// The chain end is rounded up to the next checkpoint after adding this margin, so the
/// verifier always holds the full child window of the latest proof.
pub const DEFAULT_BLOCK_COUNT: u64 = 10;

/// Largest integer accepted by the compact-size encoder (2^53 - 1)
///
/// The verifier tooling handles sizes as IEEE doubles, so values above the safe-integer
/// ceiling are rejected rather than silently rounded.
pub const MAX_COMPACT_SIZE: u64 = (1 << 53) - 1;
