//! Consensus KV adapter
//!
//! The coordinator persists its data model through the replicated log's
//! key-value store. `ConsensusStore` is the seam: typed read/write/delete
//! plus the leader query. Writes must only be issued by the leader; the
//! adapter does not enforce this; callers consult `leader()` first.
//!
//! Two implementations ship with the crate: `RocksStore`, a local
//! single-peer engine the binary runs with, and `MemStore`, an in-memory
//! store with a scriptable leader used by tests to drive elections.

use async_trait::async_trait;
use rocksdb::{Options, DB};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Node registry key.
pub const KEY_NODES: &str = "ND";
/// Partitions table key.
pub const KEY_TABLE: &str = "MT";
/// Partition count key (decimal string).
pub const KEY_PARTITION_NUM: &str = "PN";
/// Per-partition replicaset key prefix.
pub const KEY_PARTITION_PREFIX: &str = "PART:";

/// Key of the replicaset record for one partition.
pub fn partition_key(id: u32) -> String {
    format!("{}{}", KEY_PARTITION_PREFIX, id)
}

#[async_trait]
pub trait ConsensusStore: Send + Sync {
    /// Linearizable read from the log.
    async fn read(&self, key: &str) -> crate::Result<Vec<u8>>;

    /// Local-replica read; may be stale. Used on hot paths where staleness
    /// is bounded by log replay.
    async fn dirty_read(&self, key: &str) -> crate::Result<Vec<u8>>;

    /// Replicated write; returns only after commit quorum.
    async fn write(&self, key: &str, value: Vec<u8>) -> crate::Result<()>;

    async fn delete(&self, key: &str) -> crate::Result<()>;

    /// Current leader's `(ip, consensus_port)`, if one is elected.
    async fn leader(&self) -> Option<(String, u16)>;
}

/// Local single-peer engine backed by rocksdb.
///
/// It reports itself leader unconditionally; a multi-peer ensemble plugs a
/// real consensus engine into `ConsensusStore` instead.
pub struct RocksStore {
    db: DB,
    local: (String, u16),
}

impl RocksStore {
    /// Open or create the store under the consensus data directory.
    pub fn open(path: impl AsRef<Path>, local_ip: &str, consensus_port: u16) -> crate::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            local: (local_ip.to_string(), consensus_port),
        })
    }
}

#[async_trait]
impl ConsensusStore for RocksStore {
    async fn read(&self, key: &str) -> crate::Result<Vec<u8>> {
        match self.db.get(key.as_bytes())? {
            Some(value) => Ok(value),
            None => Err(crate::Error::NotFound(key.to_string())),
        }
    }

    async fn dirty_read(&self, key: &str) -> crate::Result<Vec<u8>> {
        self.read(key).await
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> crate::Result<()> {
        self.db.put(key.as_bytes(), value)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        self.db.delete(key.as_bytes())?;
        Ok(())
    }

    async fn leader(&self) -> Option<(String, u16)> {
        Some(self.local.clone())
    }
}

/// In-memory store with a settable leader endpoint.
pub struct MemStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    leader: Mutex<Option<(String, u16)>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            leader: Mutex::new(None),
        }
    }

    /// Script an election outcome.
    pub fn set_leader(&self, leader: Option<(String, u16)>) {
        *self.leader.lock().unwrap() = leader;
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsensusStore for MemStore {
    async fn read(&self, key: &str) -> crate::Result<Vec<u8>> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| crate::Error::NotFound(key.to_string()))
    }

    async fn dirty_read(&self, key: &str) -> crate::Result<Vec<u8>> {
        self.read(key).await
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> crate::Result<()> {
        self.data.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn leader(&self) -> Option<(String, u16)> {
        self.leader.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocks_store() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("meta.db"), "127.0.0.1", 9100).unwrap();

        assert!(store.read(KEY_NODES).await.unwrap_err().is_not_found());

        store.write(KEY_NODES, b"abc".to_vec()).await.unwrap();
        assert_eq!(store.read(KEY_NODES).await.unwrap(), b"abc");
        assert_eq!(store.dirty_read(KEY_NODES).await.unwrap(), b"abc");

        store.delete(KEY_NODES).await.unwrap();
        assert!(store.read(KEY_NODES).await.unwrap_err().is_not_found());

        assert_eq!(store.leader().await, Some(("127.0.0.1".to_string(), 9100)));
    }

    #[tokio::test]
    async fn test_mem_store_leader_script() {
        let store = MemStore::new();
        assert_eq!(store.leader().await, None);

        store.set_leader(Some(("10.0.0.5".to_string(), 9100)));
        assert_eq!(store.leader().await, Some(("10.0.0.5".to_string(), 9100)));

        store.set_leader(None);
        assert_eq!(store.leader().await, None);
    }

    #[test]
    fn test_partition_key() {
        assert_eq!(partition_key(0), "PART:0");
        assert_eq!(partition_key(17), "PART:17");
    }
}
