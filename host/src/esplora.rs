//! Esplora REST client.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use bitcoin_proof_core::{
    error::{ProofError, ProofResult},
    provider::Provider,
    types::{BlockInfo, MerkleProof, TransactionInfo},
};
use futures::future::try_join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::config::Config;

/// [`Provider`] backed by an Esplora-compatible HTTP API.
#[derive(Clone, Debug)]
pub struct EsploraClient {
    client: reqwest::Client,
    base_url: String,
    block_chunk_size: u64,
    max_retries: u32,
    retry_delay: Duration,
}

impl EsploraClient {
    pub fn new(
        base_url: impl Into<String>,
        block_chunk_size: u64,
        max_retries: u32,
        retry_delay: Duration,
        timeout: Duration,
    ) -> ProofResult<Self> {
        if block_chunk_size == 0 {
            return Err(ProofError::ValueRange("block chunk size must be positive".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProofError::Transport(format!("could not build http client: {e}")))?;
        Ok(EsploraClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            block_chunk_size,
            max_retries,
            retry_delay,
        })
    }

    pub fn from_config(config: &Config) -> ProofResult<Self> {
        Self::new(
            config.base_url(),
            config.block_chunk_size,
            config.retries,
            config.retry_delay,
            config.timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GETs `path` and returns the body. Connection failures, 429 and 5xx responses are
    /// retried up to `max_retries` times; 404 maps to `NotFound` right away.
    async fn get_text(&self, path: &str) -> ProofResult<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;
        loop {
            trace!(%url, %retries, "requesting explorer");
            let failure = match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .text()
                            .await
                            .map_err(|e| ProofError::Transport(format!("{url}: {e}")));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ProofError::NotFound(url));
                    }
                    let body = resp.text().await.unwrap_or_default();
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(ProofError::Transport(format!(
                            "{url}: {status} {}",
                            body.trim()
                        )));
                    }
                    format!("{status} {}", body.trim())
                }
                Err(err) => err.to_string(),
            };

            if retries >= self.max_retries {
                return Err(ProofError::Transport(format!(
                    "{url}: giving up after {retries} retries: {failure}"
                )));
            }
            retries += 1;
            warn!(%url, err = %failure, %retries, "explorer request failed, retrying");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ProofResult<T> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body)
            .map_err(|e| ProofError::MalformedInput(format!("{path}: {e}")))
    }
}

/// Tip heights for the `/blocks/{height}` calls that cover `[start, end]`, each call
/// returning `chunk` blocks counting down from its tip.
pub fn chunk_tips(start: u64, end: u64, chunk: u64) -> Vec<u64> {
    if start > end || chunk == 0 {
        return Vec::new();
    }
    let count = end - start + 1;
    (0..count.div_ceil(chunk)).map(|i| end - i * chunk).collect()
}

#[async_trait]
impl Provider for EsploraClient {
    async fn get_transaction(&self, txid: &Txid) -> ProofResult<TransactionInfo> {
        self.get_json(&format!("/tx/{txid}")).await
    }

    async fn get_transaction_hex(&self, txid: &Txid) -> ProofResult<String> {
        Ok(self
            .get_text(&format!("/tx/{txid}/hex"))
            .await?
            .trim()
            .to_string())
    }

    async fn get_merkle_proof(&self, txid: &Txid) -> ProofResult<MerkleProof> {
        self.get_json(&format!("/tx/{txid}/merkle-proof")).await
    }

    async fn get_blocks_in_range(&self, start: u64, end: u64) -> ProofResult<Vec<BlockInfo>> {
        if start > end {
            return Err(ProofError::InconsistentRange {
                start,
                end,
                reason: "start is above end".into(),
            });
        }
        let tips = chunk_tips(start, end, self.block_chunk_size);
        debug!(start, end, calls = tips.len(), "fetching block range");
        let chunks: Vec<Vec<BlockInfo>> = try_join_all(
            tips.iter().map(|tip| async move {
                self.get_json::<Vec<BlockInfo>>(&format!("/blocks/{tip}"))
                    .await
            }),
        )
        .await?;

        let mut blocks: Vec<BlockInfo> = chunks
            .into_iter()
            .flatten()
            .filter(|b| (start..=end).contains(&b.height))
            .collect();
        blocks.sort_by_key(|b| b.height);
        blocks.dedup_by_key(|b| b.height);
        Ok(blocks)
    }

    async fn get_block_header(&self, hash: &BlockHash) -> ProofResult<String> {
        Ok(self
            .get_text(&format!("/block/{hash}/header"))
            .await?
            .trim()
            .to_string())
    }
}
