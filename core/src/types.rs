use std::collections::HashMap;

use bitcoin::{BlockHash, Txid};
use serde::{Deserialize, Serialize};

use crate::{
    constants::DEFAULT_STEP,
    error::{ProofError, ProofResult},
};

/// Block metadata as reported by the explorer, plus the lazily fetched header.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct BlockInfo {
    /// Block hash in explorer display order.
    pub id: BlockHash,
    pub height: u64,
    pub timestamp: u64,
    pub bits: u32,
    /// 80-byte header as 160 hex characters, wire order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl BlockInfo {
    /// Attaches a header if none is present yet. A second attach is a no-op.
    pub fn with_header(mut self, header: String) -> Self {
        set_once(&mut self.header, header);
        self
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }
}

/// Confirmation status of a transaction.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub block_hash: Option<BlockHash>,
    #[serde(default)]
    pub block_time: Option<u64>,
}

/// Subset of the explorer transaction response the proof needs.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TransactionInfo {
    pub txid: Txid,
    pub status: TxStatus,
}

impl TransactionInfo {
    /// Height and hash of the containing block, or `NotFound` when unconfirmed.
    pub fn confirmation(&self) -> ProofResult<(u64, BlockHash)> {
        match (self.status.confirmed, self.status.block_height, self.status.block_hash) {
            (true, Some(height), Some(hash)) => Ok((height, hash)),
            _ => Err(ProofError::NotFound(format!(
                "transaction {} is not confirmed",
                self.txid
            ))),
        }
    }
}

/// Merkle inclusion path as returned by the explorer.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct MerkleProof {
    pub block_height: u64,
    /// Sibling hashes, leaf level first, in explorer display order.
    pub merkle: Vec<String>,
    /// Position of the transaction inside its block.
    pub pos: u64,
}

/// The checkpoint lattice `initial_height + k * step`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct Lattice {
    pub step: u64,
    pub initial_height: u64,
}

impl Lattice {
    pub fn new(step: u64, initial_height: u64) -> ProofResult<Self> {
        if step == 0 {
            return Err(ProofError::ValueRange("checkpoint step must be positive".into()));
        }
        Ok(Lattice {
            step,
            initial_height,
        })
    }

    /// Parses the `step:initial_height` form used on the command line.
    pub fn parse(s: &str) -> ProofResult<Self> {
        let (step, initial) = s
            .split_once(':')
            .ok_or_else(|| ProofError::MalformedInput(format!("expected step:height, got {s}")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|e| ProofError::MalformedInput(format!("{v}: {e}")))
        };
        Lattice::new(parse(step)?, parse(initial)?)
    }
}

impl Default for Lattice {
    fn default() -> Self {
        Lattice {
            step: DEFAULT_STEP,
            initial_height: 0,
        }
    }
}

/// Per-transaction proof state, enriched monotonically and persisted after every step.
///
/// Optional fields go from absent to present exactly once. The `with_*` builders take
/// the record by value and leave already-present fields untouched, so repeating an
/// enrichment step can never change a cached value.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct ProofInfo {
    pub txid: Txid,
    pub status: TxStatus,
    pub step: u64,
    pub initial_height: u64,
    #[serde(rename = "rawTx", default, skip_serializing_if = "Option::is_none")]
    pub raw_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_proof: Option<MerkleProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_header: Option<String>,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub this_block: Option<BlockInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<BlockInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<BlockInfo>>,
}

impl ProofInfo {
    /// Starts a fresh record from provider data. Fails if the containing block lies
    /// below the lattice's initial checkpoint.
    pub fn new(info: TransactionInfo, lattice: Lattice) -> ProofResult<Self> {
        let record = ProofInfo {
            txid: info.txid,
            status: info.status,
            step: lattice.step,
            initial_height: lattice.initial_height,
            raw_tx: None,
            merkle_proof: None,
            block_index: None,
            block_header: None,
            this_block: None,
            parents: None,
            children: None,
        };
        record.check_height()?;
        Ok(record)
    }

    pub fn lattice(&self) -> ProofResult<Lattice> {
        Lattice::new(self.step, self.initial_height)
    }

    pub fn block_height(&self) -> ProofResult<u64> {
        self.status.block_height.ok_or_else(|| {
            ProofError::NotFound(format!("transaction {} is not confirmed", self.txid))
        })
    }

    pub fn block_hash(&self) -> ProofResult<BlockHash> {
        self.status.block_hash.ok_or_else(|| {
            ProofError::NotFound(format!("transaction {} is not confirmed", self.txid))
        })
    }

    pub fn check_height(&self) -> ProofResult<()> {
        let height = self.block_height()?;
        if height < self.initial_height {
            return Err(ProofError::HeightBelowCheckpoint {
                height,
                initial_height: self.initial_height,
            });
        }
        Ok(())
    }

    pub fn with_raw_tx(mut self, raw_tx: String) -> Self {
        set_once(&mut self.raw_tx, raw_tx);
        self
    }

    /// Records the merkle path and takes the block index from its position.
    pub fn with_merkle_proof(mut self, proof: MerkleProof) -> Self {
        if self.merkle_proof.is_none() {
            set_once(&mut self.block_index, proof.pos);
            self.merkle_proof = Some(proof);
        }
        self
    }

    pub fn with_block_header(mut self, header: String) -> Self {
        set_once(&mut self.block_header, header);
        self
    }

    /// Records the checkpoint window. The three parts are set together or not at all.
    pub fn with_window(
        mut self,
        this_block: BlockInfo,
        parents: Vec<BlockInfo>,
        children: Vec<BlockInfo>,
    ) -> Self {
        if !self.has_window() {
            self.this_block = Some(this_block);
            self.parents = Some(parents);
            self.children = Some(children);
        }
        self
    }

    /// Copies headers from `fetched` onto window blocks that still lack one, matched by
    /// block hash. Blocks that already carry a header keep it.
    pub fn with_window_headers(mut self, fetched: &[BlockInfo]) -> Self {
        let headers: HashMap<BlockHash, &String> = fetched
            .iter()
            .filter_map(|b| b.header.as_ref().map(|h| (b.id, h)))
            .collect();
        let fill = |block: &mut BlockInfo| {
            if let Some(header) = headers.get(&block.id) {
                set_once(&mut block.header, (*header).clone());
            }
        };
        if let Some(block) = self.this_block.as_mut() {
            fill(block);
        }
        self.parents.iter_mut().flatten().for_each(&fill);
        self.children.iter_mut().flatten().for_each(&fill);
        self
    }

    /// `self`, then parents, then children.
    pub fn window_blocks(&self) -> impl Iterator<Item = &BlockInfo> {
        self.this_block
            .iter()
            .chain(self.parents.iter().flatten())
            .chain(self.children.iter().flatten())
    }

    pub fn has_window(&self) -> bool {
        self.this_block.is_some() && self.parents.is_some() && self.children.is_some()
    }

    /// True once every block of the window carries its header.
    pub fn window_has_headers(&self) -> bool {
        let all = |blocks: &Option<Vec<BlockInfo>>| {
            blocks
                .as_ref()
                .is_some_and(|b| b.iter().all(BlockInfo::has_header))
        };
        self.this_block.as_ref().is_some_and(BlockInfo::has_header)
            && all(&self.parents)
            && all(&self.children)
    }

    pub fn is_complete(&self) -> bool {
        self.raw_tx.is_some()
            && self.merkle_proof.is_some()
            && self.block_index.is_some()
            && self.block_header.is_some()
            && self.window_has_headers()
    }

    pub(crate) fn require<'a, T>(
        &self,
        field: &'a Option<T>,
        name: &'static str,
    ) -> ProofResult<&'a T> {
        field.as_ref().ok_or_else(|| ProofError::IncompleteRecord {
            txid: self.txid.to_string(),
            field: name,
        })
    }
}

/// Fills `slot` only when it is still empty.
pub(crate) fn set_once<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    const EXPLORER_TX_JSON: &str = r#"{
        "txid": "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16",
        "version": 1,
        "locktime": 0,
        "vin": [],
        "vout": [],
        "size": 275,
        "weight": 1100,
        "fee": 0,
        "status": {
            "confirmed": true,
            "block_height": 170,
            "block_hash": "00000000d1145790a8694403d4063f323d499e655c83426834d4ce2f8dd4a2ee",
            "block_time": 1231731025
        }
    }"#;

    fn sample_info() -> TransactionInfo {
        serde_json::from_str(EXPLORER_TX_JSON).unwrap()
    }

    #[test]
    fn test_transaction_info_from_explorer_json() {
        let info = sample_info();
        let (height, hash) = info.confirmation().unwrap();
        assert_eq!(height, 170);
        assert_eq!(
            hash,
            BlockHash::from_str("00000000d1145790a8694403d4063f323d499e655c83426834d4ce2f8dd4a2ee")
                .unwrap()
        );
    }

    #[test]
    fn test_unconfirmed_transaction_is_not_found() {
        let mut info = sample_info();
        info.status = TxStatus {
            confirmed: false,
            block_height: None,
            block_hash: None,
            block_time: None,
        };
        assert!(matches!(info.confirmation(), Err(ProofError::NotFound(_))));
    }

    #[test]
    fn test_record_below_initial_height_is_rejected() {
        let err = ProofInfo::new(sample_info(), Lattice::new(10, 180).unwrap()).unwrap_err();
        assert_eq!(
            err,
            ProofError::HeightBelowCheckpoint {
                height: 170,
                initial_height: 180
            }
        );
        assert!(ProofInfo::new(sample_info(), Lattice::new(10, 170).unwrap()).is_ok());
    }

    #[test]
    fn test_fields_are_set_once() {
        let record = ProofInfo::new(sample_info(), Lattice::new(10, 160).unwrap())
            .unwrap()
            .with_raw_tx("aa".into())
            .with_raw_tx("bb".into())
            .with_merkle_proof(MerkleProof {
                block_height: 170,
                merkle: vec![],
                pos: 1,
            })
            .with_merkle_proof(MerkleProof {
                block_height: 170,
                merkle: vec![],
                pos: 7,
            });
        assert_eq!(record.raw_tx.as_deref(), Some("aa"));
        assert_eq!(record.block_index, Some(1));
        assert_eq!(record.merkle_proof.as_ref().map(|p| p.pos), Some(1));
    }

    #[test]
    fn test_record_json_uses_persisted_field_names() {
        let record = ProofInfo::new(sample_info(), Lattice::new(10, 160).unwrap())
            .unwrap()
            .with_raw_tx("00".into());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["rawTx"], "00");
        assert_eq!(value["initial_height"], 160);
        assert!(value.get("self").is_none());

        let back: ProofInfo = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_lattice_parse() {
        assert_eq!(
            Lattice::parse("10:840000").unwrap(),
            Lattice {
                step: 10,
                initial_height: 840000
            }
        );
        assert!(matches!(Lattice::parse("10"), Err(ProofError::MalformedInput(_))));
        assert!(matches!(Lattice::parse("0:5"), Err(ProofError::ValueRange(_))));
    }
}
