use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use bitcoin_proof_core::constants::{DEFAULT_BLOCK_COUNT, DEFAULT_STEP};
use dotenv::dotenv;

pub const BLOCKSTREAM_API_URL: &str = "https://blockstream.info/api";
pub const MUTINYNET_API_URL: &str = "https://www.mutinynet.com/api";

/// Esplora `/blocks/{height}` returns this many blocks counting down from `height`.
pub const ESPLORA_BLOCK_CHUNK_SIZE: u64 = 10;

/// Block explorer backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Blockstream,
    Mutinynet,
    /// Any Esplora-compatible base URL.
    Custom(String),
}

impl ProviderKind {
    pub fn base_url(&self) -> &str {
        match self {
            ProviderKind::Blockstream => BLOCKSTREAM_API_URL,
            ProviderKind::Mutinynet => MUTINYNET_API_URL,
            ProviderKind::Custom(url) => url.as_str(),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    /// Accepts a preset name, the legacy numeric ids (1 blockstream, 2 mutinynet) or an
    /// http(s) base URL.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "blockstream" | "1" => Ok(ProviderKind::Blockstream),
            "mutinynet" | "2" => Ok(ProviderKind::Mutinynet),
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(ProviderKind::Custom(url.trim_end_matches('/').to_string()))
            }
            other => Err(anyhow!(
                "unknown provider {other}, expected blockstream, mutinynet or a base URL"
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Blockstream => write!(f, "blockstream"),
            ProviderKind::Mutinynet => write!(f, "mutinynet"),
            ProviderKind::Custom(url) => write!(f, "{url}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// One pretty-printed JSON file per entry.
    File,
    /// A single SQLite database.
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "file" => Ok(StoreKind::File),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(anyhow!("unknown store {other}, expected file or sqlite")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub provider: ProviderKind,
    /// Overrides the preset's base URL.
    pub api_url: Option<String>,
    pub block_chunk_size: u64,
    pub cache_dir: PathBuf,
    pub store: StoreKind,
    pub sqlite_path: PathBuf,
    pub step: u64,
    pub block_count: u64,
    pub retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Config {
    /// Reads `.env` if present, then the `PROOF_*` environment variables.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            provider: or("PROOF_PROVIDER", "blockstream").parse()?,
            api_url: var("PROOF_API_URL").filter(|url| !url.is_empty()),
            block_chunk_size: or("PROOF_BLOCK_CHUNK_SIZE", &ESPLORA_BLOCK_CHUNK_SIZE.to_string())
                .parse()
                .context("PROOF_BLOCK_CHUNK_SIZE must be an integer")?,
            cache_dir: PathBuf::from(or("PROOF_CACHE_DIR", "data/proofs")),
            store: or("PROOF_STORE", "file").parse()?,
            sqlite_path: PathBuf::from(or("PROOF_SQLITE_PATH", "data/proofs.sqlite")),
            step: or("PROOF_STEP", &DEFAULT_STEP.to_string())
                .parse()
                .context("PROOF_STEP must be an integer")?,
            block_count: or("PROOF_BLOCK_COUNT", &DEFAULT_BLOCK_COUNT.to_string())
                .parse()
                .context("PROOF_BLOCK_COUNT must be an integer")?,
            retries: or("PROOF_RETRIES", "3")
                .parse()
                .context("PROOF_RETRIES must be an integer")?,
            retry_delay: Duration::from_millis(
                or("PROOF_RETRY_DELAY_MS", "1500")
                    .parse()
                    .context("PROOF_RETRY_DELAY_MS must be an integer")?,
            ),
            timeout: Duration::from_secs(
                or("PROOF_TIMEOUT_SECS", "30")
                    .parse()
                    .context("PROOF_TIMEOUT_SECS must be an integer")?,
            ),
        })
    }

    pub fn base_url(&self) -> &str {
        self.api_url
            .as_deref()
            .unwrap_or_else(|| self.provider.base_url())
    }

    /// Namespace for cache entries so two explorers never share records.
    pub fn namespace(&self) -> String {
        match &self.provider {
            ProviderKind::Custom(_) => "custom".to_string(),
            preset => preset.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.provider, ProviderKind::Blockstream);
        assert_eq!(config.base_url(), BLOCKSTREAM_API_URL);
        assert_eq!(config.block_chunk_size, 10);
        assert_eq!(config.store, StoreKind::File);
        assert_eq!(config.step, 10);
        assert_eq!(config.block_count, 10);
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1500));
        assert_eq!(config.namespace(), "blockstream");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PROOF_PROVIDER", "2"),
            ("PROOF_API_URL", "http://127.0.0.1:3002"),
            ("PROOF_STORE", "sqlite"),
            ("PROOF_STEP", "6"),
            ("PROOF_RETRY_DELAY_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.provider, ProviderKind::Mutinynet);
        assert_eq!(config.base_url(), "http://127.0.0.1:3002");
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.step, 6);
        assert_eq!(config.retry_delay, Duration::ZERO);
        assert_eq!(config.namespace(), "mutinynet");
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("PROOF_STEP", "ten")]).is_err());
        assert!(config(&[("PROOF_PROVIDER", "3")]).is_err());
        assert!(config(&[("PROOF_STORE", "rocksdb")]).is_err());
    }

    #[test]
    fn test_custom_provider_url() {
        let kind: ProviderKind = "https://mempool.space/api/".parse().unwrap();
        assert_eq!(kind.base_url(), "https://mempool.space/api");
    }
}
