//! Error taxonomy for proof assembly.
//!
//! Every variant is fatal for the current run. Recovery is a rerun, which is cheap
//! because every completed enrichment step is persisted.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type ProofResult<T> = Result<T, ProofError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// The provider could not be reached or exhausted its retries.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Unknown or unconfirmed transaction, unknown block.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad hex, wrong length, undecodable payload.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Integer outside the representable or allowed range.
    #[error("Value out of range: {0}")]
    ValueRange(String),

    #[error("Block height {height} is below the initial checkpoint height {initial_height}")]
    HeightBelowCheckpoint { height: u64, initial_height: u64 },

    #[error("Transaction order violated: first block height {first} > second block height {second}")]
    OrderingViolation { first: u64, second: u64 },

    /// The block range returned for a checkpoint window does not match the request.
    #[error("Inconsistent block range [{start}, {end}]: {reason}")]
    InconsistentRange { start: u64, end: u64, reason: String },

    #[error("Header chain length mismatch: expected {expected} bytes, got {actual}")]
    ChainLengthMismatch { expected: usize, actual: usize },

    /// Provider data failed an integrity check (hash or merkle root).
    #[error("{what} mismatch: expected {expected}, found {found}")]
    DataMismatch {
        what: &'static str,
        expected: String,
        found: String,
    },

    /// A bundle was requested from a record that is missing a field.
    #[error("Record for {txid} is incomplete: missing {field}")]
    IncompleteRecord { txid: String, field: &'static str },

    /// The record store failed to read or write.
    #[error("Store: {0}")]
    Store(String),
}

impl From<serde_json::Error> for ProofError {
    fn from(err: serde_json::Error) -> Self {
        ProofError::MalformedInput(format!("json: {err}"))
    }
}

impl From<hex::FromHexError> for ProofError {
    fn from(err: hex::FromHexError) -> Self {
        ProofError::MalformedInput(format!("hex: {err}"))
    }
}
