//! Per-wallet lists of in-flight swap and bridge transactions

use super::backend::KeyValueBackend;
use super::records::{BridgeTransfer, SwapTransaction};
use crate::error::{ClientError, ClientResult};
use crate::swap::SwapSettings;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

pub const BRIDGE_TRANSACTIONS: &str = "bridge_transactions";
pub const SWAP_TRANSACTIONS: &str = "swap_transactions";
pub const SWAP_SETTINGS: &str = "swap_settings";

/// Durable record of submitted transactions, keyed by wallet address.
///
/// The in-memory copy of each key is authoritative and the backend is
/// written through on every change. A failed write leaves the change in
/// memory; the next successful write of that key persists it. A record
/// that cannot be read or parsed is treated as absent and rebuilt by
/// later writes.
pub struct PendingTransferStore {
    backend: Arc<dyn KeyValueBackend>,
    entries: DashMap<String, Value>,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl PendingTransferStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn bridge_transfers(&self, wallet: &str) -> Vec<BridgeTransfer> {
        self.load(BRIDGE_TRANSACTIONS, wallet).await
    }

    pub async fn swap_transactions(&self, wallet: &str) -> Vec<SwapTransaction> {
        self.load(SWAP_TRANSACTIONS, wallet).await
    }

    pub async fn append_bridge_transfer(
        &self,
        wallet: &str,
        transfer: BridgeTransfer,
    ) -> ClientResult<()> {
        self.update(BRIDGE_TRANSACTIONS, wallet, |list: &mut Vec<BridgeTransfer>| {
            list.push(transfer)
        })
        .await
        .map(|_| ())
    }

    pub async fn append_swap_transaction(
        &self,
        wallet: &str,
        transaction: SwapTransaction,
    ) -> ClientResult<()> {
        self.update(SWAP_TRANSACTIONS, wallet, |list: &mut Vec<SwapTransaction>| {
            list.push(transaction)
        })
        .await
        .map(|_| ())
    }

    /// Apply `f` to the stored bridge list and persist the result
    pub async fn update_bridge_transfers<F>(
        &self,
        wallet: &str,
        f: F,
    ) -> ClientResult<Vec<BridgeTransfer>>
    where
        F: FnOnce(&mut Vec<BridgeTransfer>) + Send,
    {
        self.update(BRIDGE_TRANSACTIONS, wallet, f).await
    }

    /// Apply `f` to the stored swap list and persist the result
    pub async fn update_swap_transactions<F>(
        &self,
        wallet: &str,
        f: F,
    ) -> ClientResult<Vec<SwapTransaction>>
    where
        F: FnOnce(&mut Vec<SwapTransaction>) + Send,
    {
        self.update(SWAP_TRANSACTIONS, wallet, f).await
    }

    /// Swap settings last saved for `wallet`
    pub async fn swap_settings(&self, wallet: &str) -> Option<SwapSettings> {
        let key = store_key(SWAP_SETTINGS, wallet);
        let value = self.read(&key).await?;
        match serde_json::from_value(value) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("Discarding unreadable record {}: {}", key, e);
                None
            }
        }
    }

    pub async fn save_swap_settings(
        &self,
        wallet: &str,
        settings: SwapSettings,
    ) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(&store_key(SWAP_SETTINGS, wallet), &settings)
            .await
    }

    async fn update<T, F>(&self, kind: &str, wallet: &str, f: F) -> ClientResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut Vec<T>),
    {
        let _guard = self.write_lock.lock().await;

        let mut list = self.load(kind, wallet).await;
        f(&mut list);
        self.persist(&store_key(kind, wallet), &list).await?;

        Ok(list)
    }

    /// Replace the in-memory value of `key`, then write it through
    async fn persist<T: Serialize>(&self, key: &str, value: &T) -> ClientResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| ClientError::Store(format!("serialize {}: {}", key, e)))?;
        let json = value.to_string();
        self.entries.insert(key.to_string(), value);

        self.backend.write(key, &json).await.map_err(|e| {
            warn!("Write of {} failed, keeping it in memory: {}", key, e);
            e
        })
    }

    async fn load<T: DeserializeOwned>(&self, kind: &str, wallet: &str) -> Vec<T> {
        let key = store_key(kind, wallet);
        let Some(value) = self.read(&key).await else {
            return Vec::new();
        };

        match serde_json::from_value(value) {
            Ok(list) => list,
            Err(e) => {
                warn!("Discarding unreadable record {}: {}", key, e);
                Vec::new()
            }
        }
    }

    async fn read(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.entries.get(key) {
            return Some(value.value().clone());
        }

        let raw = match self.backend.read(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read {}: {} - treating as empty", key, e);
                return None;
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            // A write that landed meanwhile wins over what was just read
            Ok(value) => Some(self.entries.entry(key.to_string()).or_insert(value).value().clone()),
            Err(e) => {
                warn!("Discarding unreadable record {}: {}", key, e);
                None
            }
        }
    }
}

fn store_key(kind: &str, wallet: &str) -> String {
    format!("{}_{}", kind, wallet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::{FileBackend, FlakyBackend, MemoryBackend};
    use crate::store::records::{SwapStatus, TransferStatus};
    use chrono::Utc;

    fn transfer(hash: &str) -> BridgeTransfer {
        BridgeTransfer::new(hash.into(), 1, 2, 10_000_000_000, 12)
    }

    #[tokio::test]
    async fn test_append_preserves_order_per_wallet() {
        let store = PendingTransferStore::new(Arc::new(MemoryBackend::new()));
        store.append_bridge_transfer("w1", transfer("a")).await.unwrap();
        store.append_bridge_transfer("w1", transfer("b")).await.unwrap();
        store.append_bridge_transfer("w2", transfer("c")).await.unwrap();

        let hashes: Vec<_> = store
            .bridge_transfers("w1")
            .await
            .into_iter()
            .map(|t| t.hash)
            .collect();
        assert_eq!(hashes, vec!["a", "b"]);
        assert_eq!(store.bridge_transfers("w2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_write_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write("bridge_transactions_w1", "[{\"hash\": \"a\", \"sour")
            .await
            .unwrap();
        let store = PendingTransferStore::new(backend);

        assert!(store.bridge_transfers("w1").await.is_empty());

        // The next successful write rebuilds the record
        store.append_bridge_transfer("w1", transfer("b")).await.unwrap();
        assert_eq!(store.bridge_transfers("w1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_record_in_memory() {
        let backend = Arc::new(FlakyBackend::failing());
        let store = PendingTransferStore::new(backend.clone());

        tokio_test::assert_err!(store.append_bridge_transfer("w1", transfer("a")).await);
        assert_eq!(store.bridge_transfers("w1").await.len(), 1);
        assert_eq!(backend.read("bridge_transactions_w1").await.unwrap(), None);

        // The next successful write carries the earlier record with it
        backend.set_failing(false);
        tokio_test::assert_ok!(store.append_bridge_transfer("w1", transfer("b")).await);
        let persisted = PendingTransferStore::new(backend);
        let hashes: Vec<_> = persisted
            .bridge_transfers("w1")
            .await
            .into_iter()
            .map(|t| t.hash)
            .collect();
        assert_eq!(hashes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_swap_settings_per_wallet() {
        let backend = Arc::new(MemoryBackend::new());
        let store = PendingTransferStore::new(backend.clone());
        assert_eq!(store.swap_settings("w1").await, None);

        let settings = SwapSettings::new(120, 5).unwrap();
        tokio_test::assert_ok!(store.save_swap_settings("w1", settings).await);
        assert_eq!(store.swap_settings("w2").await, None);

        let reopened = PendingTransferStore::new(backend);
        assert_eq!(reopened.swap_settings("w1").await, Some(settings));
    }

    #[tokio::test]
    async fn test_update_rewrites_full_list() {
        let store = PendingTransferStore::new(Arc::new(MemoryBackend::new()));
        store.append_bridge_transfer("w1", transfer("a")).await.unwrap();

        let updated = store
            .update_bridge_transfers("w1", |list| {
                for t in list.iter_mut() {
                    t.status = TransferStatus::Completed;
                }
            })
            .await
            .unwrap();
        assert_eq!(updated[0].status, TransferStatus::Completed);
        assert_eq!(
            store.bridge_transfers("w1").await[0].status,
            TransferStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::new(dir.path()).await.unwrap();
            let store = PendingTransferStore::new(Arc::new(backend));
            store
                .append_swap_transaction(
                    "w1",
                    SwapTransaction {
                        hash: "s1".into(),
                        token_in: "A".into(),
                        token_out: "B".into(),
                        amount_in: 1,
                        min_out: 0,
                        deadline: 0,
                        status: SwapStatus::Pending,
                        created_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let backend = FileBackend::new(dir.path()).await.unwrap();
        let store = PendingTransferStore::new(Arc::new(backend));
        let swaps = store.swap_transactions("w1").await;
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].hash, "s1");
    }
}
