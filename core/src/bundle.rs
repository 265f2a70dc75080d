//! Proof bundles: the verifier-facing view of a completed [`ProofInfo`].
//!
//! A bundle is rebuilt from the record on every call and never persisted. Hashes are
//! converted to natural byte order here; raw transactions and headers are already in
//! wire order and pass through untouched.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    coder::{decode_hex, hex_string, reverse_words, write_compact_size},
    constants::HASH_BYTES,
    error::{ProofError, ProofResult},
    merkle::verify_inclusion,
    types::{BlockInfo, ProofInfo},
};

/// What the parent and child lists carry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointEncoding {
    /// 32-byte block hashes, natural order.
    Hashes,
    /// Full 80-byte headers.
    #[default]
    Headers,
}

impl FromStr for CheckpointEncoding {
    type Err = ProofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hashes" => Ok(CheckpointEncoding::Hashes),
            "headers" => Ok(CheckpointEncoding::Headers),
            other => Err(ProofError::MalformedInput(format!(
                "unknown checkpoint encoding {other}, expected hashes or headers"
            ))),
        }
    }
}

impl fmt::Display for CheckpointEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointEncoding::Hashes => write!(f, "hashes"),
            CheckpointEncoding::Headers => write!(f, "headers"),
        }
    }
}

/// Payload shape expected by a given verifier version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BundleOptions {
    pub checkpoints: CheckpointEncoding,
    /// Emit `compact_size(index)` before the raw transaction in the binary blob.
    pub index_prefix: bool,
    /// Prefix hex strings with `0x` in the JSON view and the hex blob.
    pub hex_prefix: bool,
    /// Recompute the merkle root and compare it to the containing header.
    pub verify_inclusion: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        BundleOptions {
            checkpoints: CheckpointEncoding::Headers,
            index_prefix: false,
            hex_prefix: false,
            verify_inclusion: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofBundle {
    /// Merkle siblings, natural order, leaf level first.
    pub merkle_proof: Vec<String>,
    /// Blocks in `(prev, height)`, ascending.
    pub parents: Vec<String>,
    /// Blocks in `(height, next]`, ascending.
    pub children: Vec<String>,
    pub index: u64,
    pub block_height: u64,
    pub block_header: String,
    pub raw_tx: String,
    pub options: BundleOptions,
}

/// JSON shape of a bundle, every list concatenated into one hex string.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleView {
    pub merkle_proof: String,
    pub parents: String,
    pub children: String,
    pub index: u64,
    pub block_height: u64,
    pub block_header: String,
    pub raw_tx: String,
}

impl ProofBundle {
    pub fn from_record(record: &ProofInfo, options: BundleOptions) -> ProofResult<Self> {
        let raw_tx = record.require(&record.raw_tx, "rawTx")?;
        let proof = record.require(&record.merkle_proof, "merkle_proof")?;
        let index = *record.require(&record.block_index, "block_index")?;
        let block_header = record.require(&record.block_header, "block_header")?;
        let this_block = record.require(&record.this_block, "self")?;
        let parents = record.require(&record.parents, "parents")?;
        let children = record.require(&record.children, "children")?;

        if options.verify_inclusion {
            verify_inclusion(&record.txid, &proof.merkle, proof.pos, block_header)?;
        }

        let merkle_proof = proof
            .merkle
            .iter()
            .map(|h| reverse_words(h, HASH_BYTES))
            .collect::<ProofResult<Vec<_>>>()?;
        let checkpoint = |block: &BlockInfo| -> ProofResult<String> {
            match options.checkpoints {
                CheckpointEncoding::Hashes => reverse_words(&block.id.to_string(), HASH_BYTES),
                CheckpointEncoding::Headers => {
                    block.header.clone().ok_or_else(|| ProofError::IncompleteRecord {
                        txid: record.txid.to_string(),
                        field: "checkpoint header",
                    })
                }
            }
        };

        Ok(ProofBundle {
            merkle_proof,
            parents: parents.iter().map(checkpoint).collect::<ProofResult<_>>()?,
            children: children.iter().map(checkpoint).collect::<ProofResult<_>>()?,
            index,
            block_height: this_block.height,
            block_header: block_header.clone(),
            raw_tx: raw_tx.clone(),
            options,
        })
    }

    pub fn view(&self) -> BundleView {
        let prefixed = |hex: &str| hex_string(hex, self.options.hex_prefix);
        BundleView {
            merkle_proof: prefixed(&self.merkle_proof.concat()),
            parents: prefixed(&self.parents.concat()),
            children: prefixed(&self.children.concat()),
            index: self.index,
            block_height: self.block_height,
            block_header: prefixed(&self.block_header),
            raw_tx: prefixed(&self.raw_tx),
        }
    }

    /// Binary blob:
    ///
    /// | field            | encoding                     |
    /// |------------------|------------------------------|
    /// | merkle count     | compact size                 |
    /// | merkle path      | 32 bytes each, natural order |
    /// | parent count     | compact size                 |
    /// | parents          | 32-byte hash or 80-byte header each |
    /// | child count      | compact size                 |
    /// | children         | as parents                   |
    /// | index            | compact size, optional       |
    /// | raw transaction  | wire format                  |
    pub fn to_bytes(&self) -> ProofResult<Vec<u8>> {
        let mut out = Vec::new();
        for list in [&self.merkle_proof, &self.parents, &self.children] {
            write_compact_size(&mut out, list.len() as u64)?;
            for item in list {
                out.extend(decode_hex(item)?);
            }
        }
        if self.options.index_prefix {
            write_compact_size(&mut out, self.index)?;
        }
        out.extend(decode_hex(&self.raw_tx)?);
        Ok(out)
    }

    pub fn to_hex(&self) -> ProofResult<String> {
        Ok(hex_string(&hex::encode(self.to_bytes()?), self.options.hex_prefix))
    }
}
