//! Checkpointed SPV proof assembly for a Bitcoin bridge verifier.
//!
//! Given a block-explorer [`Provider`], the crate resolves a transaction to its block,
//! brackets that block between two checkpoints of a fixed height lattice, fetches and
//! caches the headers in between, and serializes the result into the byte layout the
//! verifier consumes.

pub mod assembler;
pub mod bundle;
pub mod cache;
pub mod coder;
pub mod constants;
pub mod error;
pub mod merkle;
pub mod provider;
pub mod store;
pub mod types;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use assembler::{Assembler, ChainAnchor, HeaderChain, PegIn, PegOut};
pub use bundle::{BundleOptions, BundleView, CheckpointEncoding, ProofBundle};
pub use cache::ProofCache;
pub use error::{ProofError, ProofResult};
pub use provider::Provider;
pub use store::{MemoryStore, RecordStore, StoreKey};
pub use types::{BlockInfo, Lattice, MerkleProof, ProofInfo, TransactionInfo, TxStatus};
pub use window::CheckpointWindow;
