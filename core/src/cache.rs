//! Idempotent enrichment of [`ProofInfo`] records.
//!
//! Every `ensure_*` step checks its target field first and only reaches the provider when
//! the field is still absent. The record is written back to the store after every step,
//! so a crashed run resumes from the last completed step.

use bitcoin::{Transaction, Txid};
use tracing::{debug, info};

use crate::{
    coder::decode_hex,
    error::{ProofError, ProofResult},
    provider::{attach_headers, fetch_header, Provider},
    store::{load_json, save_json, RecordStore, StoreKey},
    types::{BlockInfo, Lattice, ProofInfo, TransactionInfo},
    window::fetch_window,
};

pub struct ProofCache<P, S> {
    provider: P,
    store: S,
}

impl<P: Provider, S: RecordStore> ProofCache<P, S> {
    pub fn new(provider: P, store: S) -> Self {
        ProofCache { provider, store }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads the persisted record for `txid` on `lattice`, or starts one from the
    /// provider's transaction metadata.
    pub async fn open(&self, txid: &Txid, lattice: Lattice) -> ProofResult<ProofInfo> {
        if let Some(record) = self.load(txid, lattice)? {
            return Ok(record);
        }
        let info = self.provider.get_transaction(txid).await?;
        self.open_with(info, lattice)
    }

    /// Same as [`ProofCache::open`] with transaction metadata the caller already holds.
    pub fn open_with(&self, info: TransactionInfo, lattice: Lattice) -> ProofResult<ProofInfo> {
        if let Some(record) = self.load(&info.txid, lattice)? {
            return Ok(record);
        }
        info.confirmation()?;
        let record = ProofInfo::new(info, lattice)?;
        info!(
            txid = %record.txid,
            step = lattice.step,
            initial_height = lattice.initial_height,
            "starting proof record"
        );
        self.persist(&record)?;
        Ok(record)
    }

    pub async fn ensure_raw_transaction(&self, record: ProofInfo) -> ProofResult<ProofInfo> {
        let record = if record.raw_tx.is_some() {
            record
        } else {
            debug!(txid = %record.txid, "fetching raw transaction");
            let raw = self.provider.get_transaction_hex(&record.txid).await?;
            let raw = raw.trim().to_lowercase();
            check_raw_transaction(&record.txid, &raw)?;
            record.with_raw_tx(raw)
        };
        self.persist(&record)?;
        Ok(record)
    }

    pub async fn ensure_merkle_proof(&self, record: ProofInfo) -> ProofResult<ProofInfo> {
        let record = if record.merkle_proof.is_some() {
            record
        } else {
            debug!(txid = %record.txid, "fetching merkle proof");
            let proof = self.provider.get_merkle_proof(&record.txid).await?;
            let height = record.block_height()?;
            if proof.block_height != height {
                return Err(ProofError::DataMismatch {
                    what: "merkle proof height",
                    expected: height.to_string(),
                    found: proof.block_height.to_string(),
                });
            }
            record.with_merkle_proof(proof)
        };
        self.persist(&record)?;
        Ok(record)
    }

    /// Resolves `self`, `parents` and `children` and attaches a header to each of them.
    pub async fn ensure_checkpoint_window(&self, record: ProofInfo) -> ProofResult<ProofInfo> {
        if record.window_has_headers() {
            self.persist(&record)?;
            return Ok(record);
        }

        let record = if record.has_window() {
            record
        } else {
            let window =
                fetch_window(&self.provider, record.lattice()?, record.block_height()?).await?;
            let expected = record.block_hash()?;
            if window.this_block.id != expected {
                return Err(ProofError::DataMismatch {
                    what: "containing block",
                    expected: expected.to_string(),
                    found: window.this_block.id.to_string(),
                });
            }
            let record = record.with_window(window.this_block, window.parents, window.children);
            self.persist(&record)?;
            record
        };

        let missing: Vec<BlockInfo> =
            record.window_blocks().filter(|b| !b.has_header()).cloned().collect();
        debug!(txid = %record.txid, count = missing.len(), "attaching window headers");
        let fetched = attach_headers(&self.provider, missing).await?;
        let record = record.with_window_headers(&fetched);
        self.persist(&record)?;
        Ok(record)
    }

    /// Attaches the containing block's header, reusing the window's copy when present.
    pub async fn ensure_block_header(&self, record: ProofInfo) -> ProofResult<ProofInfo> {
        let record = if record.block_header.is_some() {
            record
        } else {
            let cached = record.this_block.as_ref().and_then(|b| b.header.clone());
            let header = match cached {
                Some(header) => header,
                None => {
                    debug!(txid = %record.txid, "fetching containing block header");
                    fetch_header(&self.provider, &record.block_hash()?).await?
                }
            };
            record.with_block_header(header)
        };
        self.persist(&record)?;
        Ok(record)
    }

    /// Runs every enrichment step in dependency order.
    pub async fn resolve(&self, record: ProofInfo) -> ProofResult<ProofInfo> {
        let record = self.ensure_raw_transaction(record).await?;
        let record = self.ensure_merkle_proof(record).await?;
        let record = self.ensure_checkpoint_window(record).await?;
        let record = self.ensure_block_header(record).await?;
        info!(
            txid = %record.txid,
            block_height = ?record.status.block_height,
            "proof record complete"
        );
        Ok(record)
    }

    fn load(&self, txid: &Txid, lattice: Lattice) -> ProofResult<Option<ProofInfo>> {
        let key = StoreKey::proof(*txid, lattice);
        let Some(record) = load_json::<ProofInfo>(&self.store, &key)? else {
            return Ok(None);
        };
        if record.txid != *txid || record.lattice()? != lattice {
            return Err(ProofError::Store(format!("{key} holds a record for another transaction")));
        }
        record.check_height()?;
        Ok(Some(record))
    }

    fn persist(&self, record: &ProofInfo) -> ProofResult<()> {
        save_json(&self.store, &StoreKey::proof(record.txid, record.lattice()?), record)
    }
}

/// The raw transaction must decode and hash to the txid it was fetched for.
fn check_raw_transaction(txid: &Txid, raw: &str) -> ProofResult<()> {
    let tx: Transaction = bitcoin::consensus::deserialize(&decode_hex(raw)?)
        .map_err(|e| ProofError::MalformedInput(format!("raw transaction {txid}: {e}")))?;
    let found = tx.compute_txid();
    if found != *txid {
        return Err(ProofError::DataMismatch {
            what: "txid",
            expected: txid.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::atomic::Ordering};

    use super::*;
    use crate::{
        store::MemoryStore,
        test_utils::{MockProvider, BLOCK_170_SPEND_HEX, BLOCK_170_SPEND_TXID},
    };

    fn lattice() -> Lattice {
        Lattice::new(10, 100).unwrap()
    }

    fn scenario() -> (MockProvider, Txid) {
        let mut provider = MockProvider::with_chain(95, 125);
        let txid = provider.add_transaction(107, 5);
        (provider, txid)
    }

    #[tokio::test]
    async fn test_resolve_fills_every_field() {
        let (provider, txid) = scenario();
        let cache = ProofCache::new(&provider, MemoryStore::new());

        let record = cache.open(&txid, lattice()).await.unwrap();
        let record = cache.resolve(record).await.unwrap();

        assert!(record.is_complete());
        assert_eq!(record.block_index, Some(5));
        assert_eq!(record.block_header, Some(provider.header_hex(107)));
        let this_block = record.this_block.as_ref().unwrap();
        assert_eq!(this_block.height, 107);
        assert_eq!(this_block.id, provider.block_hash(107));
        let parents: Vec<u64> = record.parents.as_ref().unwrap().iter().map(|b| b.height).collect();
        assert_eq!(parents, (101..=106).collect::<Vec<_>>());
        let children: Vec<u64> =
            record.children.as_ref().unwrap().iter().map(|b| b.height).collect();
        assert_eq!(children, vec![108, 109, 110]);
        for block in record.window_blocks() {
            assert_eq!(block.header.as_deref(), Some(provider.header_hex(block.height).as_str()));
        }

        assert_eq!(provider.range_requests(), vec![(100, 110)]);
        // One header per window block; the containing header is reused.
        assert_eq!(provider.header_calls(), 10);
    }

    #[tokio::test]
    async fn test_every_step_is_idempotent() {
        let (provider, txid) = scenario();
        let cache = ProofCache::new(&provider, MemoryStore::new());
        let record = cache.open(&txid, lattice()).await.unwrap();

        let once = cache.ensure_raw_transaction(record).await.unwrap();
        let twice = cache.ensure_raw_transaction(once.clone()).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(provider.calls.transaction_hex.load(Ordering::SeqCst), 1);

        let once = cache.ensure_merkle_proof(twice).await.unwrap();
        let twice = cache.ensure_merkle_proof(once.clone()).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(provider.calls.merkle_proof.load(Ordering::SeqCst), 1);

        let once = cache.ensure_checkpoint_window(twice).await.unwrap();
        let calls = provider.total_calls();
        let twice = cache.ensure_checkpoint_window(once.clone()).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(provider.total_calls(), calls);

        let once = cache.ensure_block_header(twice).await.unwrap();
        let twice = cache.ensure_block_header(once.clone()).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(provider.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_block_header_alone_fetches_once() {
        let (provider, txid) = scenario();
        let cache = ProofCache::new(&provider, MemoryStore::new());
        let record = cache.open(&txid, lattice()).await.unwrap();

        let record = cache.ensure_block_header(record).await.unwrap();
        assert_eq!(record.block_header, Some(provider.header_hex(107)));
        assert!(!record.has_window());
        let record = cache.ensure_block_header(record).await.unwrap();
        assert_eq!(record.block_header, Some(provider.header_hex(107)));
        assert_eq!(provider.header_calls(), 1);
    }

    #[tokio::test]
    async fn test_persisted_record_resumes_without_provider_calls() {
        let (provider, txid) = scenario();
        let store = MemoryStore::new();
        let first = {
            let cache = ProofCache::new(&provider, &store);
            let record = cache.open(&txid, lattice()).await.unwrap();
            cache.resolve(record).await.unwrap()
        };
        let calls = provider.total_calls();

        let cache = ProofCache::new(&provider, &store);
        let record = cache.open(&txid, lattice()).await.unwrap();
        assert_eq!(record, first);
        let record = cache.resolve(record).await.unwrap();
        assert_eq!(record, first);
        assert_eq!(provider.total_calls(), calls);
    }

    #[tokio::test]
    async fn test_partial_record_resumes_from_last_step() {
        let (provider, txid) = scenario();
        let store = MemoryStore::new();
        {
            let cache = ProofCache::new(&provider, &store);
            let record = cache.open(&txid, lattice()).await.unwrap();
            cache.ensure_raw_transaction(record).await.unwrap();
        }

        let cache = ProofCache::new(&provider, &store);
        let record = cache.open(&txid, lattice()).await.unwrap();
        assert!(record.raw_tx.is_some());
        cache.resolve(record).await.unwrap();
        assert_eq!(provider.calls.transaction.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.transaction_hex.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_window_past_chain_tip_is_not_recorded() {
        let store = MemoryStore::new();
        let mut short = MockProvider::with_chain(95, 108);
        let txid = short.add_transaction(107, 5);
        {
            let cache = ProofCache::new(&short, &store);
            let record = cache.open(&txid, lattice()).await.unwrap();
            let err = cache.resolve(record).await.unwrap_err();
            assert!(matches!(
                err,
                ProofError::InconsistentRange { start: 100, end: 110, .. }
            ));
        }

        let (full, same_txid) = scenario();
        assert_eq!(same_txid, txid);
        let cache = ProofCache::new(&full, &store);
        let record = cache.open(&txid, lattice()).await.unwrap();
        assert!(record.raw_tx.is_some());
        assert!(!record.has_window());

        let record = cache.resolve(record).await.unwrap();
        assert!(record.is_complete());
        let children: Vec<u64> =
            record.children.as_ref().unwrap().iter().map(|b| b.height).collect();
        assert_eq!(children, vec![108, 109, 110]);
    }

    #[tokio::test]
    async fn test_real_transaction_passes_txid_check() {
        let mut provider = MockProvider::with_chain(95, 125);
        let txid = provider.add_raw_transaction(112, 1, BLOCK_170_SPEND_HEX);
        assert_eq!(txid, Txid::from_str(BLOCK_170_SPEND_TXID).unwrap());

        let cache = ProofCache::new(&provider, MemoryStore::new());
        let record = cache.open(&txid, lattice()).await.unwrap();
        let record = cache.ensure_raw_transaction(record).await.unwrap();
        assert_eq!(record.raw_tx.as_deref(), Some(BLOCK_170_SPEND_HEX));
    }

    #[tokio::test]
    async fn test_substituted_raw_transaction_is_rejected() {
        let (mut provider, txid) = scenario();
        provider.replace_raw_tx(txid, BLOCK_170_SPEND_HEX);
        let store = MemoryStore::new();
        let cache = ProofCache::new(&provider, &store);

        let record = cache.open(&txid, lattice()).await.unwrap();
        let err = cache.ensure_raw_transaction(record).await.unwrap_err();
        assert!(matches!(err, ProofError::DataMismatch { what: "txid", .. }));

        let persisted = cache.open(&txid, lattice()).await.unwrap();
        assert!(persisted.raw_tx.is_none());
    }

    #[tokio::test]
    async fn test_substituted_header_is_rejected() {
        let (mut provider, txid) = scenario();
        let other = provider.header_hex(120);
        provider.replace_header(104, &other);
        let cache = ProofCache::new(&provider, MemoryStore::new());

        let record = cache.open(&txid, lattice()).await.unwrap();
        let err = cache.ensure_checkpoint_window(record).await.unwrap_err();
        assert!(matches!(err, ProofError::DataMismatch { what: "block hash", .. }));
    }

    #[tokio::test]
    async fn test_height_below_initial_checkpoint() {
        let (provider, txid) = scenario();
        let cache = ProofCache::new(&provider, MemoryStore::new());
        let err = cache.open(&txid, Lattice::new(10, 110).unwrap()).await.unwrap_err();
        assert_eq!(
            err,
            ProofError::HeightBelowCheckpoint {
                height: 107,
                initial_height: 110
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction_is_not_found() {
        let (provider, _) = scenario();
        let cache = ProofCache::new(&provider, MemoryStore::new());
        let txid = Txid::from_str(BLOCK_170_SPEND_TXID).unwrap();
        assert!(matches!(
            cache.open(&txid, lattice()).await,
            Err(ProofError::NotFound(_))
        ));
    }
}
