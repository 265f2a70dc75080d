use std::fs;

use anyhow::{Context, Result};
use bitcoin_proof_core::RecordStore;
use tracing::info;

pub mod config;
pub mod esplora;
pub mod file_store;
pub mod fixture;
pub mod sqlite;

use config::{Config, StoreKind};
use file_store::FileStore;
use sqlite::SqliteStore;

/// Opens the cache backend selected by `config`, namespaced by explorer.
pub fn open_store(config: &Config) -> Result<Box<dyn RecordStore>> {
    let namespace = config.namespace();
    match config.store {
        StoreKind::File => {
            info!(dir = %config.cache_dir.display(), %namespace, "using file cache");
            Ok(Box::new(FileStore::new(&config.cache_dir, namespace)))
        }
        StoreKind::Sqlite => {
            if let Some(parent) = config.sqlite_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            info!(path = %config.sqlite_path.display(), %namespace, "using sqlite cache");
            let store = SqliteStore::new(&config.sqlite_path, &namespace).with_context(|| {
                format!("failed to open {}", config.sqlite_path.display())
            })?;
            Ok(Box::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin_proof_core::StoreKey;

    use super::*;

    #[test]
    fn test_open_store_backends() {
        let dir = tempfile::tempdir().unwrap();
        let key = StoreKey::blocks(3, 4);
        for store in [StoreKind::File, StoreKind::Sqlite] {
            let config = Config {
                store,
                cache_dir: dir.path().join("files"),
                sqlite_path: dir.path().join("db/proofs.sqlite"),
                ..Config::from_vars(|_| None).unwrap()
            };
            let opened = open_store(&config).unwrap();
            assert_eq!(opened.read(&key).unwrap(), None);
            opened.write(&key, b"[]").unwrap();
            assert_eq!(opened.read(&key).unwrap(), Some(b"[]".to_vec()));
        }
        assert!(dir.path().join("db/proofs.sqlite").exists());
    }
}
