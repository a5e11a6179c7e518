// ============================================================================
// Listener Registry
// One listener per (asset, channel type, tx type), built once at startup
// ============================================================================

use super::listener::{DltListener, ListenerKey, TxEvent};
use crate::domain::{ChannelType, EngineConfig, PendingTx, TxType};
use crate::errors::LedgerError;
use crate::interfaces::LedgerRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Explicit replacement for process-wide listener singletons: constructed
/// once and shared by handle with everything that registers hashes.
pub struct ListenerRegistry {
    listeners: BTreeMap<ListenerKey, Arc<DltListener>>,
}

impl ListenerRegistry {
    /// Build listeners for every asset in `ledgers`. All of them forward into
    /// the returned receiver, which the hook dispatcher drains.
    pub fn build(
        ledgers: &LedgerRegistry,
        config: &EngineConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TxEvent>), LedgerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut listeners = BTreeMap::new();

        for asset in ledgers.assets() {
            let ledger = ledgers.get(asset)?;
            for channel_type in [ChannelType::Initiate, ChannelType::Participate] {
                for tx_type in [TxType::Contract, TxType::Redeem, TxType::Refund] {
                    let key = ListenerKey::new(asset, channel_type, tx_type);
                    let listener =
                        DltListener::new(key.clone(), Arc::clone(&ledger), sender.clone(), config);
                    listeners.insert(key, Arc::new(listener));
                }
            }
        }

        Ok((Self { listeners }, receiver))
    }

    pub fn get(&self, key: &ListenerKey) -> Option<Arc<DltListener>> {
        self.listeners.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Start tracking a broadcast transaction. Returns false when the hash
    /// was already tracked.
    pub fn track(&self, pending: &PendingTx) -> Result<bool, LedgerError> {
        let key = ListenerKey::new(pending.asset.clone(), pending.channel_type, pending.tx_type);
        let listener = self
            .listeners
            .get(&key)
            .ok_or_else(|| LedgerError::UnsupportedAsset(pending.asset.clone()))?;
        Ok(listener.add_tx(&pending.hash))
    }

    /// Re-arm a hash whose hook failed. False when no listener owns `key`.
    pub fn retry(&self, key: &ListenerKey, hash: &str) -> bool {
        match self.listeners.get(key) {
            Some(listener) => {
                listener.retry_tx(hash);
                true
            },
            None => false,
        }
    }

    /// Re-poll every tracked hash on every listener
    pub async fn recheck_if_mined(&self) -> usize {
        let mut forwarded = 0;
        for listener in self.listeners.values() {
            forwarded += listener.recheck_if_mined().await;
        }
        info!(forwarded, "recheck of tracked transactions finished");
        forwarded
    }

    /// Poll every listener once
    pub async fn poll_once(&self) -> usize {
        let mut forwarded = 0;
        for listener in self.listeners.values() {
            forwarded += listener.poll_once().await;
        }
        forwarded
    }

    /// Spawn one polling task per listener
    pub fn spawn_all(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.listeners
            .values()
            .map(|listener| tokio::spawn(Arc::clone(listener).run(shutdown.clone())))
            .collect()
    }
}
