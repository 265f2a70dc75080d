use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use bitcoin_proof_core::{
    error::{ProofError, ProofResult},
    store::{RecordStore, StoreKey},
};
use tracing::trace;

/// One file per entry at `{dir}/{namespace}-{key}.json`.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
    namespace: String,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        FileStore {
            dir: dir.into(),
            namespace: namespace.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &StoreKey) -> PathBuf {
        self.dir.join(format!("{}-{}.json", self.namespace, key))
    }
}

impl RecordStore for FileStore {
    fn read(&self, key: &StoreKey) -> ProofResult<Option<Vec<u8>>> {
        let path = self.path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProofError::Store(format!("{}: {e}", path.display()))),
        }
    }

    fn write(&self, key: &StoreKey, value: &[u8]) -> ProofResult<()> {
        let path = self.path(key);
        trace!(path = %path.display(), "writing cache file");
        fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(&path, value))
            .map_err(|e| ProofError::Store(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Txid;
    use bitcoin_proof_core::{
        store::{load_json, save_json},
        test_utils::BLOCK_170_SPEND_TXID,
        types::Lattice,
    };

    use super::*;

    #[test]
    fn test_missing_entry_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"), "blockstream");
        assert_eq!(store.read(&StoreKey::blocks(1, 2)).unwrap(), None);
    }

    #[test]
    fn test_write_creates_directory_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("a/b"), "blockstream");
        let key = StoreKey::blocks(90, 120);

        store.write(&key, b"first").unwrap();
        store.write(&key, b"second").unwrap();
        assert_eq!(store.read(&key).unwrap(), Some(b"second".to_vec()));
        assert!(dir.path().join("a/b/blockstream-blocks-90-120.json").exists());
    }

    #[test]
    fn test_proof_key_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), "mutinynet");
        let txid: Txid = BLOCK_170_SPEND_TXID.parse().unwrap();
        let key = StoreKey::proof(txid, Lattice::new(10, 0).unwrap());
        assert_eq!(
            store.path(&key),
            dir.path()
                .join(format!("mutinynet-proof-10_0-{BLOCK_170_SPEND_TXID}.json"))
        );
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileStore::new(dir.path(), "blockstream");
        let b = FileStore::new(dir.path(), "mutinynet");
        let key = StoreKey::blocks(5, 5);

        save_json(&a, &key, &vec![1u64, 2]).unwrap();
        assert_eq!(load_json::<Vec<u64>>(&a, &key).unwrap(), Some(vec![1, 2]));
        assert_eq!(load_json::<Vec<u64>>(&b, &key).unwrap(), None);
    }
}
