//! In-memory provider over a synthetic, correctly linked header chain.
//!
//! Every header decodes and hashes to its block id, and every registered transaction
//! really hashes to its txid and really sits under its block's merkle root, so the
//! integrity checks run against the mock exactly as they do against a live explorer.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use bitcoin::{
    absolute,
    block::{Header, Version},
    consensus::encode::{deserialize, serialize_hex},
    hashes::Hash,
    transaction, Amount, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxMerkleNode, TxOut, Txid, Witness,
};

use crate::{
    coder::decode_hex,
    error::{ProofError, ProofResult},
    merkle::{calculate_double_sha256, compute_merkle_root, hash_pair},
    provider::Provider,
    types::{BlockInfo, MerkleProof, TransactionInfo, TxStatus},
};

/// Spend of the first coinbase ever paid to another key, mined in block 170.
pub const BLOCK_170_SPEND_HEX: &str = "0100000001c997a5e56e104102fa209c6a852dd90660a20b2d9c352423edce25857fcd3704000000004847304402204e45e16932b8af514961a1d3a1a25fdf3f4f7732e9d624c6c61548ab5fb8cd410220181522ec8eca07de4860a4acdd12909d831cc56cbbac4622082221a8768d1d0901ffffffff0200ca9a3b00000000434104ae1a62fe09c5f51b13905f07f06b99a2f7159b2225f374cd378d71302fa28414e7aab37397f554a7df5f142c21c1b7303b8a0626f1baded5c72a704f7e6cd84cac00286bee0000000043410411db93e1dcdb8a016b49840f8c53bc1eb68a382e97b1482ecad7b148a6909a5cb2e0eaddfb84ccf9744464f82e160bfa9b8b64f9d4c03f999b8643f656b412a3ac00000000";

pub const BLOCK_170_SPEND_TXID: &str =
    "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16";

const GENESIS_TIME: u32 = 1_600_000_000;
const REGTEST_BITS: u32 = 0x207f_ffff;

/// Block metadata without a chain behind it, for pure partitioning tests.
pub fn block_at(height: u64) -> BlockInfo {
    BlockInfo {
        id: BlockHash::from_byte_array(calculate_double_sha256(&height.to_le_bytes())),
        height,
        timestamp: GENESIS_TIME as u64 + height * 600,
        bits: REGTEST_BITS,
        header: None,
    }
}

#[derive(Clone, Debug)]
struct MockTx {
    raw: String,
    height: u64,
    pos: u64,
    /// Display-order siblings.
    merkle: Vec<String>,
}

/// Call counters, one per provider method.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub transaction: AtomicUsize,
    pub transaction_hex: AtomicUsize,
    pub merkle_proof: AtomicUsize,
    pub block_header: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MockProvider {
    start: u64,
    end: u64,
    headers: BTreeMap<u64, Header>,
    txs: HashMap<Txid, MockTx>,
    raw_overrides: HashMap<Txid, String>,
    header_overrides: HashMap<BlockHash, String>,
    pub calls: CallCounts,
    ranges: Mutex<Vec<(u64, u64)>>,
}

impl MockProvider {
    /// A chain of linked headers covering heights `[start, end]`.
    pub fn with_chain(start: u64, end: u64) -> Self {
        let mut provider = MockProvider {
            start,
            end,
            ..Default::default()
        };
        provider.rebuild();
        provider
    }

    /// Places a synthetic transaction at `pos` in the block at `height`.
    pub fn add_transaction(&mut self, height: u64, pos: u64) -> Txid {
        let tx = Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(height.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50_000 + pos),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        self.add_raw_transaction(height, pos, &serialize_hex(&tx))
    }

    /// Places a serialized transaction at `pos` in the block at `height`. A block may
    /// hold several transactions at distinct positions; unused positions are filled with
    /// synthetic leaves.
    pub fn add_raw_transaction(&mut self, height: u64, pos: u64, raw: &str) -> Txid {
        assert!(self.headers.contains_key(&height), "height {height} outside mock chain");
        assert!(
            self.txs.values().all(|t| (t.height, t.pos) != (height, pos)),
            "position {pos} of block {height} is taken"
        );
        let bytes = decode_hex(raw).expect("raw transaction hex");
        let tx: Transaction = deserialize(&bytes).expect("raw transaction");
        let txid = tx.compute_txid();

        self.txs.insert(
            txid,
            MockTx {
                raw: raw.to_string(),
                height,
                pos,
                merkle: Vec::new(),
            },
        );
        self.rebuild();
        txid
    }

    /// Serves `raw` instead of the registered transaction bytes.
    pub fn replace_raw_tx(&mut self, txid: Txid, raw: &str) {
        self.raw_overrides.insert(txid, raw.to_string());
    }

    /// Serves `header` for the block at `height` instead of its real header.
    pub fn replace_header(&mut self, height: u64, header: &str) {
        let hash = self.header(height).block_hash();
        self.header_overrides.insert(hash, header.to_string());
    }

    pub fn header(&self, height: u64) -> Header {
        self.headers[&height]
    }

    pub fn header_hex(&self, height: u64) -> String {
        serialize_hex(&self.header(height))
    }

    pub fn block_hash(&self, height: u64) -> BlockHash {
        self.header(height).block_hash()
    }

    pub fn range_requests(&self) -> Vec<(u64, u64)> {
        self.ranges.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn header_calls(&self) -> usize {
        self.calls.block_header.load(Ordering::SeqCst)
    }

    /// Total calls across every provider method.
    pub fn total_calls(&self) -> usize {
        self.calls.transaction.load(Ordering::SeqCst)
            + self.calls.transaction_hex.load(Ordering::SeqCst)
            + self.calls.merkle_proof.load(Ordering::SeqCst)
            + self.calls.block_header.load(Ordering::SeqCst)
            + self.range_requests().len()
    }

    fn rebuild(&mut self) {
        let mut blocks: BTreeMap<u64, BTreeMap<u64, Txid>> = BTreeMap::new();
        for (txid, tx) in &self.txs {
            blocks.entry(tx.height).or_default().insert(tx.pos, *txid);
        }

        let mut roots: HashMap<u64, [u8; 32]> = HashMap::new();
        for (height, positions) in &blocks {
            // One trailing filler leaf keeps every path non-empty.
            let count = positions.keys().max().copied().unwrap_or(0) + 2;
            let leaves: Vec<[u8; 32]> = (0..count)
                .map(|pos| match positions.get(&pos) {
                    Some(txid) => txid.to_byte_array(),
                    None => {
                        let seed = [height.to_le_bytes(), pos.to_le_bytes()].concat();
                        calculate_double_sha256(&seed)
                    }
                })
                .collect();
            for (pos, txid) in positions {
                let path = merkle_path(&leaves, *pos as usize);
                roots.insert(*height, compute_merkle_root(txid.to_byte_array(), &path, *pos));
                if let Some(tx) = self.txs.get_mut(txid) {
                    tx.merkle = path
                        .iter()
                        .map(|node| {
                            let mut display = *node;
                            display.reverse();
                            hex::encode(display)
                        })
                        .collect();
                }
            }
        }

        self.headers.clear();
        let mut prev = BlockHash::all_zeros();
        for height in self.start..=self.end {
            let root = roots
                .get(&height)
                .copied()
                .unwrap_or_else(|| calculate_double_sha256(&height.to_be_bytes()));
            let header = Header {
                version: Version::from_consensus(0x2000_0000),
                prev_blockhash: prev,
                merkle_root: TxMerkleNode::from_byte_array(root),
                time: GENESIS_TIME + (height as u32) * 600,
                bits: CompactTarget::from_consensus(REGTEST_BITS),
                nonce: height as u32,
            };
            prev = header.block_hash();
            self.headers.insert(height, header);
        }
    }

    fn info(&self, height: u64) -> BlockInfo {
        let header = self.header(height);
        BlockInfo {
            id: header.block_hash(),
            height,
            timestamp: header.time as u64,
            bits: header.bits.to_consensus(),
            header: None,
        }
    }

    fn tx(&self, txid: &Txid) -> ProofResult<&MockTx> {
        self.txs
            .get(txid)
            .ok_or_else(|| ProofError::NotFound(format!("transaction {txid}")))
    }
}

/// Sibling path of `leaves[index]`, duplicating the last node of odd levels.
fn merkle_path(leaves: &[[u8; 32]], mut index: usize) -> Vec<[u8; 32]> {
    let mut level = leaves.to_vec();
    let mut path = Vec::new();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }
        path.push(level[index ^ 1]);
        level = level.chunks(2).map(|pair| hash_pair(&pair[0], &pair[1])).collect();
        index /= 2;
    }
    path
}

#[async_trait]
impl Provider for MockProvider {
    async fn get_transaction(&self, txid: &Txid) -> ProofResult<TransactionInfo> {
        self.calls.transaction.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx(txid)?;
        let header = self.header(tx.height);
        Ok(TransactionInfo {
            txid: *txid,
            status: TxStatus {
                confirmed: true,
                block_height: Some(tx.height),
                block_hash: Some(header.block_hash()),
                block_time: Some(header.time as u64),
            },
        })
    }

    async fn get_transaction_hex(&self, txid: &Txid) -> ProofResult<String> {
        self.calls.transaction_hex.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx(txid)?;
        Ok(self
            .raw_overrides
            .get(txid)
            .cloned()
            .unwrap_or_else(|| tx.raw.clone()))
    }

    async fn get_merkle_proof(&self, txid: &Txid) -> ProofResult<MerkleProof> {
        self.calls.merkle_proof.fetch_add(1, Ordering::SeqCst);
        let tx = self.tx(txid)?;
        Ok(MerkleProof {
            block_height: tx.height,
            merkle: tx.merkle.clone(),
            pos: tx.pos,
        })
    }

    async fn get_blocks_in_range(&self, start: u64, end: u64) -> ProofResult<Vec<BlockInfo>> {
        if let Ok(mut ranges) = self.ranges.lock() {
            ranges.push((start, end));
        }
        Ok(self
            .headers
            .range(start..=end)
            .map(|(height, _)| self.info(*height))
            .collect())
    }

    async fn get_block_header(&self, hash: &BlockHash) -> ProofResult<String> {
        self.calls.block_header.fetch_add(1, Ordering::SeqCst);
        if let Some(header) = self.header_overrides.get(hash) {
            return Ok(header.clone());
        }
        self.headers
            .values()
            .find(|h| h.block_hash() == *hash)
            .map(|h| serialize_hex(h))
            .ok_or_else(|| ProofError::NotFound(format!("block {hash}")))
    }
}
