//! Peg-in / peg-out orchestration.
//!
//! Both flows derive one checkpoint lattice from the transactions' heights, fetch the
//! attested header chain covering every checkpoint window on it, and resolve each
//! transaction's record on that lattice.

use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    bundle::{BundleOptions, ProofBundle},
    cache::ProofCache,
    constants::{
        BLOCK_HEADER_BYTES, BLOCK_HEADER_HEX_LEN, DEFAULT_BLOCK_COUNT, DEFAULT_STEP,
        EPOCH_BLOCK_COUNT,
    },
    error::{ProofError, ProofResult},
    provider::{attach_headers, Provider},
    store::{load_json, save_json, RecordStore, StoreKey},
    types::{BlockInfo, Lattice, TransactionInfo},
    window::CheckpointWindow,
};

/// The block the verifier is seeded with.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainAnchor {
    pub step: u64,
    pub height: u64,
    pub hash: BlockHash,
    pub timestamp: u64,
    pub bits: u32,
    /// Timestamp of the first block of the difficulty epoch containing `height`.
    pub epoch_timestamp: u64,
}

/// Concatenated headers for `(anchor.height, end]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderChain {
    pub anchor: ChainAnchor,
    pub end: u64,
    pub headers: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PegOut {
    pub chain: HeaderChain,
    pub proof: ProofBundle,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PegIn {
    pub chain: HeaderChain,
    pub proof1: ProofBundle,
    pub proof2: ProofBundle,
}

pub struct Assembler<P, S> {
    cache: ProofCache<P, S>,
    step: u64,
    block_count: u64,
    options: BundleOptions,
}

impl<P: Provider, S: RecordStore> Assembler<P, S> {
    pub fn new(provider: P, store: S) -> Self {
        Assembler {
            cache: ProofCache::new(provider, store),
            step: DEFAULT_STEP,
            block_count: DEFAULT_BLOCK_COUNT,
            options: BundleOptions::default(),
        }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_block_count(mut self, block_count: u64) -> Self {
        self.block_count = block_count;
        self
    }

    pub fn with_options(mut self, options: BundleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> BundleOptions {
        self.options
    }

    pub fn cache(&self) -> &ProofCache<P, S> {
        &self.cache
    }

    /// Lattice and chain end for transactions at heights `first <= last`.
    ///
    /// `initial = (floor(first / step) - 1) * step` leaves a full checkpoint before the
    /// first transaction; `end = ceil((last + block_count) / step) * step`.
    pub fn chain_bounds(&self, first: u64, last: u64) -> ProofResult<(Lattice, u64)> {
        let step = self.step;
        if step == 0 {
            return Err(ProofError::ValueRange("checkpoint step must be positive".into()));
        }
        let initial = (first / step)
            .checked_sub(1)
            .map(|k| k * step)
            .ok_or_else(|| {
                ProofError::ValueRange(format!("height {first} leaves no checkpoint before it"))
            })?;
        let end = last
            .checked_add(self.block_count)
            .map(|h| h.div_ceil(step))
            .and_then(|k| k.checked_mul(step))
            .ok_or_else(|| ProofError::ValueRange(format!("chain end after {last} overflows")))?;
        let lattice = Lattice::new(step, initial)?;
        let window = CheckpointWindow::resolve(lattice, last)?;
        if end < window.next {
            return Err(ProofError::ValueRange(format!(
                "chain end {end} stops before checkpoint {} of block {last}",
                window.next
            )));
        }
        Ok((lattice, end))
    }

    pub async fn peg_out(&self, txid: &Txid) -> ProofResult<PegOut> {
        let tx = self.cache.provider().get_transaction(txid).await?;
        let (height, _) = tx.confirmation()?;
        let (lattice, end) = self.chain_bounds(height, height)?;
        info!(%txid, height, initial_height = lattice.initial_height, end, "assembling peg-out");

        let chain = self.header_chain(lattice, end).await?;
        let proof = self.prove(tx, lattice).await?;
        Ok(PegOut { chain, proof })
    }

    /// Both transactions share one lattice anchored below the first. The first must not
    /// be mined after the second.
    pub async fn peg_in(&self, txid1: &Txid, txid2: &Txid) -> ProofResult<PegIn> {
        let tx1 = self.cache.provider().get_transaction(txid1).await?;
        let tx2 = self.cache.provider().get_transaction(txid2).await?;
        let (h1, _) = tx1.confirmation()?;
        let (h2, _) = tx2.confirmation()?;
        if h1 > h2 {
            return Err(ProofError::OrderingViolation {
                first: h1,
                second: h2,
            });
        }
        let (lattice, end) = self.chain_bounds(h1, h2)?;
        info!(
            %txid1,
            %txid2,
            h1,
            h2,
            initial_height = lattice.initial_height,
            end,
            "assembling peg-in"
        );

        let chain = self.header_chain(lattice, end).await?;
        let proof1 = self.prove(tx1, lattice).await?;
        let proof2 = self.prove(tx2, lattice).await?;
        Ok(PegIn {
            chain,
            proof1,
            proof2,
        })
    }

    /// Single-record bundle on an explicit lattice.
    pub async fn proof_params(&self, txid: &Txid, lattice: Lattice) -> ProofResult<ProofBundle> {
        let record = self.cache.open(txid, lattice).await?;
        let record = self.cache.resolve(record).await?;
        ProofBundle::from_record(&record, self.options)
    }

    /// Concatenated headers for `count` blocks starting at `start`.
    pub async fn block_headers(&self, start: u64, count: u64) -> ProofResult<String> {
        if count == 0 {
            return Err(ProofError::ValueRange("header count must be positive".into()));
        }
        let end = start
            .checked_add(count - 1)
            .ok_or_else(|| ProofError::ValueRange(format!("range from {start} overflows")))?;
        let blocks = self.block_range(start, end).await?;
        concat_headers(&blocks, count)
    }

    /// Header chain for `(lattice.initial_height, end]` and its anchor.
    pub async fn header_chain(&self, lattice: Lattice, end: u64) -> ProofResult<HeaderChain> {
        let initial = lattice.initial_height;
        let blocks = self.block_range(initial, end).await?;
        let (anchor_block, rest) = blocks.split_first().ok_or_else(|| {
            ProofError::InconsistentRange {
                start: initial,
                end,
                reason: "no blocks returned".into(),
            }
        })?;
        let headers = concat_headers(rest, end - initial)?;

        let epoch_height = initial / EPOCH_BLOCK_COUNT * EPOCH_BLOCK_COUNT;
        let epoch_timestamp = match blocks.iter().find(|b| b.height == epoch_height) {
            Some(block) => block.timestamp,
            None => self.block_at(epoch_height).await?.timestamp,
        };

        Ok(HeaderChain {
            anchor: ChainAnchor {
                step: lattice.step,
                height: anchor_block.height,
                hash: anchor_block.id,
                timestamp: anchor_block.timestamp,
                bits: anchor_block.bits,
                epoch_timestamp,
            },
            end,
            headers,
        })
    }

    async fn prove(&self, tx: TransactionInfo, lattice: Lattice) -> ProofResult<ProofBundle> {
        let record = self.cache.open_with(tx, lattice)?;
        let record = self.cache.resolve(record).await?;
        ProofBundle::from_record(&record, self.options)
    }

    /// Metadata of a single block, without its header.
    async fn block_at(&self, height: u64) -> ProofResult<BlockInfo> {
        let key = StoreKey::blocks(height, height);
        let store = self.cache.store();
        if let Some(block) = load_json::<Vec<BlockInfo>>(store, &key)?
            .and_then(|blocks| blocks.into_iter().find(|b| b.height == height))
        {
            return Ok(block);
        }
        debug!(height, "fetching block");
        let block = self.cache.provider().get_block_at(height).await?;
        save_json(store, &key, &[&block])?;
        Ok(block)
    }

    /// Block metadata for `[start, end]` with headers attached, cached as one entry.
    async fn block_range(&self, start: u64, end: u64) -> ProofResult<Vec<BlockInfo>> {
        if start > end {
            return Err(ProofError::InconsistentRange {
                start,
                end,
                reason: "range is empty".into(),
            });
        }
        let key = StoreKey::blocks(start, end);
        let store = self.cache.store();
        let cached = load_json::<Vec<BlockInfo>>(store, &key)?
            .filter(|blocks| check_contiguous(blocks, start, end).is_ok());
        let blocks = match cached {
            Some(blocks) => blocks,
            None => {
                debug!(start, end, "fetching block range");
                let blocks = self.cache.provider().get_blocks_in_range(start, end).await?;
                check_contiguous(&blocks, start, end)?;
                save_json(store, &key, &blocks)?;
                blocks
            }
        };

        if blocks.iter().all(BlockInfo::has_header) {
            return Ok(blocks);
        }
        let blocks = attach_headers(self.cache.provider(), blocks).await?;
        save_json(store, &key, &blocks)?;
        Ok(blocks)
    }
}

fn check_contiguous(blocks: &[BlockInfo], start: u64, end: u64) -> ProofResult<()> {
    let contiguous = blocks.len() as u64 == end - start + 1
        && blocks.iter().zip(start..=end).all(|(b, h)| b.height == h);
    if !contiguous {
        return Err(ProofError::InconsistentRange {
            start,
            end,
            reason: format!("expected {} consecutive blocks, got {}", end - start + 1, blocks.len()),
        });
    }
    Ok(())
}

fn concat_headers(blocks: &[BlockInfo], count: u64) -> ProofResult<String> {
    let headers: String = blocks
        .iter()
        .filter_map(|b| b.header.as_deref())
        .collect();
    let expected = BLOCK_HEADER_BYTES * count as usize;
    if headers.len() != BLOCK_HEADER_HEX_LEN * count as usize {
        return Err(ProofError::ChainLengthMismatch {
            expected,
            actual: headers.len() / 2,
        });
    }
    Ok(headers)
}
