// ============================================================================
// Ledger Interface
// Asset-specific HTLC transaction services consumed by the coordinator
// ============================================================================

use crate::domain::{Channel, TxState};
use crate::errors::LedgerError;
use crate::numeric::Quantity;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// What the ledger reports about a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxReport {
    Progress(TxState),
    /// The ledger dropped or refused the transaction
    Failed(String),
}

/// Terms of a deployed HTLC as read back from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAudit {
    pub secret_hash: String,
    pub amount: Quantity,
    pub recipient: String,
}

/// Transaction service for one asset's ledger. The engine never signs or
/// builds scripts; it only sequences these calls and tracks the hashes they
/// return.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Asset symbol this service settles
    fn asset(&self) -> &str;

    /// Deploy the initiate HTLC; returns the contract transaction hash
    async fn initiate(&self, channel: &Channel, secret_hash: &str) -> Result<String, LedgerError>;

    /// Deploy the participate HTLC locked by the initiator's secret hash
    async fn participate(&self, channel: &Channel, secret_hash: &str)
        -> Result<String, LedgerError>;

    async fn redeem(&self, channel: &Channel, secret: &str) -> Result<String, LedgerError>;

    async fn refund(&self, channel: &Channel) -> Result<String, LedgerError>;

    /// Read back the terms of the channel's deployed contract
    async fn audit_contract(&self, channel: &Channel) -> Result<ContractAudit, LedgerError>;

    /// Recover the secret revealed by the channel's redeem transaction
    async fn extract_secret(&self, channel: &Channel) -> Result<String, LedgerError>;

    async fn tx_status(&self, hash: &str) -> Result<TxReport, LedgerError>;
}

// ============================================================================
// Ledger Registry
// ============================================================================

/// Asset symbol -> ledger service. Built once at startup.
#[derive(Clone, Default)]
pub struct LedgerRegistry {
    services: HashMap<String, Arc<dyn LedgerService>>,
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: Arc<dyn LedgerService>) -> Self {
        self.services.insert(service.asset().to_string(), service);
        self
    }

    pub fn get(&self, asset: &str) -> Result<Arc<dyn LedgerService>, LedgerError> {
        self.services
            .get(asset)
            .cloned()
            .ok_or_else(|| LedgerError::UnsupportedAsset(asset.to_string()))
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

// ============================================================================
// In-Memory Ledger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    transactions: HashMap<String, TxReport>,
    contracts: HashMap<String, ContractAudit>,
    /// redeem hash -> revealed secret
    secrets: HashMap<String, String>,
    unavailable: bool,
    reject_next: Option<String>,
}

/// Simulated ledger. Broadcasts land in PENDING; tests and demos drive
/// them forward with `set_state`, `confirm` and `fail`.
pub struct InMemoryLedger {
    asset: String,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn set_state(&self, hash: &str, state: TxState) {
        self.state
            .lock()
            .transactions
            .insert(hash.to_string(), TxReport::Progress(state));
    }

    pub fn confirm(&self, hash: &str) {
        self.set_state(hash, TxState::Confirmed);
    }

    pub fn fail(&self, hash: &str, reason: impl Into<String>) {
        self.state
            .lock()
            .transactions
            .insert(hash.to_string(), TxReport::Failed(reason.into()));
    }

    /// Simulate a node outage; status queries fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Make the next broadcast fail with `Rejected`
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.state.lock().reject_next = Some(reason.into());
    }

    pub fn hashes(&self) -> Vec<String> {
        self.state.lock().transactions.keys().cloned().collect()
    }

    fn broadcast(&self, kind: &str) -> Result<String, LedgerError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(LedgerError::Unavailable(format!("{} node offline", self.asset)));
        }
        if let Some(reason) = state.reject_next.take() {
            return Err(LedgerError::Rejected(reason));
        }
        let hash = format!("{}-{}-{}", self.asset.to_lowercase(), kind, Uuid::new_v4().simple());
        state
            .transactions
            .insert(hash.clone(), TxReport::Progress(TxState::Pending));
        Ok(hash)
    }

    fn deploy(&self, channel: &Channel, secret_hash: &str) -> Result<String, LedgerError> {
        let hash = self.broadcast("contract")?;
        self.state.lock().contracts.insert(
            hash.clone(),
            ContractAudit {
                secret_hash: secret_hash.to_string(),
                amount: channel.amount,
                recipient: channel.to_address.clone(),
            },
        );
        Ok(hash)
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    fn asset(&self) -> &str {
        &self.asset
    }

    async fn initiate(&self, channel: &Channel, secret_hash: &str) -> Result<String, LedgerError> {
        self.deploy(channel, secret_hash)
    }

    async fn participate(
        &self,
        channel: &Channel,
        secret_hash: &str,
    ) -> Result<String, LedgerError> {
        self.deploy(channel, secret_hash)
    }

    async fn redeem(&self, channel: &Channel, secret: &str) -> Result<String, LedgerError> {
        if channel.tx_contract.hash.is_none() {
            return Err(LedgerError::Rejected("no contract to redeem".to_string()));
        }
        let hash = self.broadcast("redeem")?;
        self.state
            .lock()
            .secrets
            .insert(hash.clone(), secret.to_string());
        Ok(hash)
    }

    async fn refund(&self, channel: &Channel) -> Result<String, LedgerError> {
        if channel.tx_contract.hash.is_none() {
            return Err(LedgerError::Rejected("no contract to refund".to_string()));
        }
        self.broadcast("refund")
    }

    async fn audit_contract(&self, channel: &Channel) -> Result<ContractAudit, LedgerError> {
        let hash = channel
            .tx_contract
            .hash
            .as_deref()
            .ok_or_else(|| LedgerError::Rejected("contract not broadcast".to_string()))?;
        self.state
            .lock()
            .contracts
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected(format!("unknown contract {hash}")))
    }

    async fn extract_secret(&self, channel: &Channel) -> Result<String, LedgerError> {
        let hash = channel
            .tx_redeem
            .hash
            .as_deref()
            .ok_or_else(|| LedgerError::Rejected("redeem not broadcast".to_string()))?;
        self.state
            .lock()
            .secrets
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected(format!("no secret revealed by {hash}")))
    }

    async fn tx_status(&self, hash: &str) -> Result<TxReport, LedgerError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(LedgerError::Unavailable(format!("{} node offline", self.asset)));
        }
        state
            .transactions
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::Rejected(format!("unknown transaction {hash}")))
    }
}
