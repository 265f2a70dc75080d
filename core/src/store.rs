//! Key-value persistence for enrichment state.
//!
//! The core only needs `read`/`write` of opaque bytes under a structured key; file and
//! database backends live in the host crate.

use std::{collections::HashMap, fmt, sync::Mutex};

use bitcoin::Txid;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    error::{ProofError, ProofResult},
    types::Lattice,
};

/// Identifies one persisted entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// A transaction record on a given lattice.
    Proof { txid: Txid, lattice: Lattice },
    /// Block metadata for the closed height range `[start, end]`.
    Blocks { start: u64, end: u64 },
}

impl StoreKey {
    pub fn proof(txid: Txid, lattice: Lattice) -> Self {
        StoreKey::Proof { txid, lattice }
    }

    pub fn blocks(start: u64, end: u64) -> Self {
        StoreKey::Blocks { start, end }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Proof { txid, lattice } => write!(
                f,
                "proof-{}_{}-{}",
                lattice.step, lattice.initial_height, txid
            ),
            StoreKey::Blocks { start, end } => write!(f, "blocks-{start}-{end}"),
        }
    }
}

/// Byte-level key-value store. Read-modify-write, not transactional.
pub trait RecordStore: Send + Sync {
    fn read(&self, key: &StoreKey) -> ProofResult<Option<Vec<u8>>>;

    fn write(&self, key: &StoreKey, value: &[u8]) -> ProofResult<()>;
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn read(&self, key: &StoreKey) -> ProofResult<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> ProofResult<()> {
        (**self).write(key, value)
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn read(&self, key: &StoreKey) -> ProofResult<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> ProofResult<()> {
        (**self).write(key, value)
    }
}

/// Loads and decodes a JSON value, `None` when the key is absent.
pub fn load_json<T: DeserializeOwned>(
    store: &impl RecordStore,
    key: &StoreKey,
) -> ProofResult<Option<T>> {
    match store.read(key)? {
        Some(bytes) => {
            debug!(%key, "loaded cached entry");
            let value = serde_json::from_slice(&bytes)
                .map_err(|e| ProofError::Store(format!("{key}: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encodes `value` as pretty JSON with a trailing newline and writes it.
pub fn save_json<T: Serialize>(
    store: &impl RecordStore,
    key: &StoreKey,
    value: &T,
) -> ProofResult<()> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|e| ProofError::Store(format!("{key}: {e}")))?;
    bytes.push(b'\n');
    store.write(key, &bytes)
}

/// In-process store, useful when nothing should outlive the run.
#[derive(Default, Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, key: &StoreKey) -> ProofResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ProofError::Store("memory store lock poisoned".into()))?;
        Ok(entries.get(&key.to_string()).cloned())
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> ProofResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ProofError::Store("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
