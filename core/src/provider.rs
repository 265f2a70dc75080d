use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use futures::future::try_join_all;
use tracing::debug;

use crate::{
    constants::BLOCK_HEADER_HEX_LEN,
    error::{ProofError, ProofResult},
    merkle::decode_header,
    types::{BlockInfo, MerkleProof, TransactionInfo},
};

/// Block-explorer capability. Implementations apply their own bounded retry and timeout
/// and surface exhaustion as [`ProofError::Transport`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Transaction metadata; `NotFound` for unknown transactions.
    async fn get_transaction(&self, txid: &Txid) -> ProofResult<TransactionInfo>;

    /// Wire-format serialized transaction as hex.
    async fn get_transaction_hex(&self, txid: &Txid) -> ProofResult<String>;

    async fn get_merkle_proof(&self, txid: &Txid) -> ProofResult<MerkleProof>;

    /// Block metadata covering exactly the closed range `[start, end]`, sorted by height.
    async fn get_blocks_in_range(&self, start: u64, end: u64) -> ProofResult<Vec<BlockInfo>>;

    /// 80-byte header as 160 hex characters.
    async fn get_block_header(&self, hash: &BlockHash) -> ProofResult<String>;

    async fn get_block_at(&self, height: u64) -> ProofResult<BlockInfo> {
        self.get_blocks_in_range(height, height)
            .await?
            .into_iter()
            .find(|b| b.height == height)
            .ok_or_else(|| ProofError::NotFound(format!("block at height {height}")))
    }
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for &P {
    async fn get_transaction(&self, txid: &Txid) -> ProofResult<TransactionInfo> {
        (**self).get_transaction(txid).await
    }

    async fn get_transaction_hex(&self, txid: &Txid) -> ProofResult<String> {
        (**self).get_transaction_hex(txid).await
    }

    async fn get_merkle_proof(&self, txid: &Txid) -> ProofResult<MerkleProof> {
        (**self).get_merkle_proof(txid).await
    }

    async fn get_blocks_in_range(&self, start: u64, end: u64) -> ProofResult<Vec<BlockInfo>> {
        (**self).get_blocks_in_range(start, end).await
    }

    async fn get_block_header(&self, hash: &BlockHash) -> ProofResult<String> {
        (**self).get_block_header(hash).await
    }

    async fn get_block_at(&self, height: u64) -> ProofResult<BlockInfo> {
        (**self).get_block_at(height).await
    }
}

/// Fetches a header and checks it really is the header of `hash`.
pub async fn fetch_header<P: Provider + ?Sized>(
    provider: &P,
    hash: &BlockHash,
) -> ProofResult<String> {
    let header = provider.get_block_header(hash).await?;
    if header.len() != BLOCK_HEADER_HEX_LEN {
        return Err(ProofError::MalformedInput(format!(
            "block header {header} length {} != {BLOCK_HEADER_HEX_LEN}",
            header.len()
        )));
    }
    let found = decode_header(&header)?.block_hash();
    if found != *hash {
        return Err(ProofError::DataMismatch {
            what: "block hash",
            expected: hash.to_string(),
            found: found.to_string(),
        });
    }
    Ok(header)
}

/// Attaches headers to every block that lacks one. Fetches run concurrently and are
/// merged back by position, so completion order does not matter.
pub async fn attach_headers<P: Provider + ?Sized>(
    provider: &P,
    blocks: Vec<BlockInfo>,
) -> ProofResult<Vec<BlockInfo>> {
    try_join_all(blocks.into_iter().map(|block| async move {
        if block.has_header() {
            return Ok(block);
        }
        debug!(height = block.height, hash = %block.id, "fetching block header");
        let header = fetch_header(provider, &block.id).await?;
        Ok(block.with_header(header))
    }))
    .await
}
