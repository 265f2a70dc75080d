// Merkle inclusion check
//
// Recomputes a block's merkle root from a txid, its sibling path and its position, so a
// proof fetched from an explorer can be checked against the containing header before it
// is handed to the verifier.

use bitcoin::{block::Header, hashes::Hash, Txid};
use sha2::{Digest, Sha256};

use crate::{
    coder::decode_hex,
    constants::{BLOCK_HEADER_BYTES, HASH_BYTES},
    error::{ProofError, ProofResult},
};

pub fn calculate_double_sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(input);
    let result = hasher.finalize_reset();
    hasher.update(result);
    hasher.finalize().into()
}

/// Hashes two merkle nodes together (natural byte order).
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(left);
    preimage[32..].copy_from_slice(right);
    calculate_double_sha256(&preimage)
}

/// Folds the path into a root. `path` holds natural-order siblings, leaf level first.
pub fn compute_merkle_root(leaf: [u8; 32], path: &[[u8; 32]], pos: u64) -> [u8; 32] {
    let mut node = leaf;
    let mut index = pos;
    for sibling in path {
        node = if index & 1 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
        index >>= 1;
    }
    node
}

/// Decodes explorer display-order hashes into natural-order byte arrays.
pub fn path_from_display(merkle: &[String]) -> ProofResult<Vec<[u8; 32]>> {
    merkle
        .iter()
        .map(|h| {
            let mut bytes: [u8; HASH_BYTES] = decode_hex(h)?.try_into().map_err(|_| {
                ProofError::MalformedInput(format!("merkle node {h} is not {HASH_BYTES} bytes"))
            })?;
            bytes.reverse();
            Ok(bytes)
        })
        .collect()
}

/// Decodes an 80-byte header from hex.
pub fn decode_header(header_hex: &str) -> ProofResult<Header> {
    let bytes = decode_hex(header_hex)?;
    if bytes.len() != BLOCK_HEADER_BYTES {
        return Err(ProofError::MalformedInput(format!(
            "block header is {} bytes, expected {BLOCK_HEADER_BYTES}",
            bytes.len()
        )));
    }
    bitcoin::consensus::deserialize(&bytes)
        .map_err(|e| ProofError::MalformedInput(format!("block header: {e}")))
}

/// Checks that `txid` at `pos` with sibling `merkle` hashes up to the header's merkle root.
pub fn verify_inclusion(
    txid: &Txid,
    merkle: &[String],
    pos: u64,
    header_hex: &str,
) -> ProofResult<()> {
    let header = decode_header(header_hex)?;
    let path = path_from_display(merkle)?;
    let root = compute_merkle_root(txid.to_byte_array(), &path, pos);
    let expected = header.merkle_root.to_byte_array();
    if root != expected {
        let mut found = root;
        found.reverse();
        return Err(ProofError::DataMismatch {
            what: "merkle root",
            expected: header.merkle_root.to_string(),
            found: hex::encode(found),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        blockdata::constants::genesis_block, consensus::encode::serialize_hex, Network,
        TxMerkleNode,
    };

    use super::*;

    #[test]
    fn test_double_sha256_matches_bitcoin_hashes() {
        let data = b"checkpointed header chain";
        let ours = calculate_double_sha256(data);
        let theirs = bitcoin::hashes::sha256d::Hash::hash(data).to_byte_array();
        assert_eq!(ours, theirs);
    }

    #[test]
    fn test_single_transaction_block_root_is_txid() {
        let genesis = genesis_block(Network::Bitcoin);
        let coinbase = genesis.txdata[0].compute_txid();
        let header_hex = serialize_hex(&genesis.header);

        verify_inclusion(&coinbase, &[], 0, &header_hex).unwrap();
    }

    #[test]
    fn test_root_matches_bitcoin_merkle_calculation() {
        let leaves: Vec<[u8; 32]> = (0u8..5).map(|i| calculate_double_sha256(&[i])).collect();
        let expected = bitcoin::merkle_tree::calculate_root(
            leaves.iter().map(|l| TxMerkleNode::from_byte_array(*l)),
        )
        .unwrap()
        .to_byte_array();

        // Path for leaf 2 in a five-leaf tree (the odd leaf at each level is paired with itself).
        let l01 = hash_pair(&leaves[0], &leaves[1]);
        let l23 = hash_pair(&leaves[2], &leaves[3]);
        let l44 = hash_pair(&leaves[4], &leaves[4]);
        let l4444 = hash_pair(&l44, &l44);
        let path = [leaves[3], l01, l4444];

        assert_eq!(compute_merkle_root(leaves[2], &path, 2), expected);
    }

    #[test]
    fn test_tampered_path_is_rejected() {
        let genesis = genesis_block(Network::Bitcoin);
        let coinbase = genesis.txdata[0].compute_txid();
        let header_hex = serialize_hex(&genesis.header);
        let bogus = vec!["11".repeat(32)];

        let err = verify_inclusion(&coinbase, &bogus, 0, &header_hex).unwrap_err();
        assert!(matches!(err, ProofError::DataMismatch { what: "merkle root", .. }));
    }

    #[test]
    fn test_short_header_is_malformed() {
        assert!(matches!(
            decode_header("00ff"),
            Err(ProofError::MalformedInput(_))
        ));
    }
}
