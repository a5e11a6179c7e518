// ============================================================================
// Persistence Interface
// Document-level storage contract plus an in-memory implementation
// ============================================================================

use crate::domain::{
    Asset, Exchange, Order, OrderId, Settlement, SettlementId, SettlementPatch, Trade,
};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Selects open orders for warm start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub exchange_id: Option<String>,
    pub pair: Option<String>,
    pub customer_id: Option<String>,
}

impl OrderFilter {
    pub fn for_book(exchange_id: impl Into<String>, pair: impl Into<String>) -> Self {
        Self {
            exchange_id: Some(exchange_id.into()),
            pair: Some(pair.into()),
            customer_id: None,
        }
    }

    /// Open orders matching every set field
    pub fn matches(&self, order: &Order) -> bool {
        order.status().is_open()
            && self
                .exchange_id
                .as_ref()
                .is_none_or(|id| *id == order.quote.exchange_id)
            && self.pair.as_ref().is_none_or(|pair| *pair == order.quote.pair)
            && self
                .customer_id
                .as_ref()
                .is_none_or(|id| id == order.customer_id())
    }
}

/// Storage the engine consumes. Every call is atomic per document; no call
/// spans documents transactionally.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get_assets(&self) -> Result<Vec<Asset>, PersistenceError>;

    async fn get_exchanges(&self) -> Result<Vec<Exchange>, PersistenceError>;

    /// Open orders in ascending book sequence
    async fn get_open_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, PersistenceError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, PersistenceError>;

    /// Writes carrying an older `Order::version` than the stored copy, or
    /// reopening a terminal order, are ignored.
    async fn upsert_order(&self, order: &Order) -> Result<(), PersistenceError>;

    async fn upsert_trade(&self, trade: &Trade) -> Result<(), PersistenceError>;

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>, PersistenceError>;

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<(), PersistenceError>;

    async fn get_settlement(&self, id: SettlementId)
        -> Result<Option<Settlement>, PersistenceError>;

    async fn get_settlement_by_tx_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Settlement>, PersistenceError>;

    /// Fails with `NotFound` when the settlement does not exist
    async fn update_settlement(
        &self,
        id: SettlementId,
        patch: &SettlementPatch,
    ) -> Result<(), PersistenceError>;

    /// Settlements holding at least one broadcast, unconfirmed transaction
    async fn get_settlements_with_pending_tx(&self) -> Result<Vec<Settlement>, PersistenceError>;

    /// Settlements not yet in a final state
    async fn get_active_settlements(&self) -> Result<Vec<Settlement>, PersistenceError>;
}

// ============================================================================
// In-Memory Persistence
// ============================================================================

#[derive(Default)]
struct Store {
    assets: Vec<Asset>,
    exchanges: Vec<Exchange>,
    orders: HashMap<OrderId, Order>,
    trades: HashMap<Uuid, Trade>,
    settlements: HashMap<SettlementId, Settlement>,
    tx_index: HashMap<String, SettlementId>,
    failing_update: Option<String>,
}

impl Store {
    fn index(&mut self, settlement: &Settlement) {
        for (_, _, hash) in settlement.tx_hashes() {
            self.tx_index.insert(hash.to_string(), settlement.id);
        }
    }
}

/// Process-local persistence for tests, demos and single-node deployments
#[derive(Default)]
pub struct InMemoryPersistence {
    store: RwLock<Store>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(self, asset: Asset) -> Self {
        self.store.write().assets.push(asset);
        self
    }

    /// Register an exchange together with every asset it references
    pub fn with_exchange(self, exchange: Exchange) -> Self {
        {
            let mut store = self.store.write();
            for asset in &exchange.assets {
                if !store.assets.iter().any(|known| known.symbol == asset.symbol) {
                    store.assets.push(asset.clone());
                }
            }
            store.exchanges.push(exchange);
        }
        self
    }

    /// Make the next `update_settlement` fail with a backend error
    pub fn fail_next_update(&self, reason: impl Into<String>) {
        self.store.write().failing_update = Some(reason.into());
    }

    pub fn order_count(&self) -> usize {
        self.store.read().orders.len()
    }

    pub fn trades(&self) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self.store.read().trades.values().cloned().collect();
        trades.sort_by_key(|trade| trade.timestamp);
        trades
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.store.read().settlements.values().cloned().collect()
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn get_assets(&self) -> Result<Vec<Asset>, PersistenceError> {
        Ok(self.store.read().assets.clone())
    }

    async fn get_exchanges(&self) -> Result<Vec<Exchange>, PersistenceError> {
        Ok(self.store.read().exchanges.clone())
    }

    async fn get_open_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, PersistenceError> {
        let mut orders: Vec<Order> = self
            .store
            .read()
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by_key(|order| (order.sequence, order.created_at));
        Ok(orders)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, PersistenceError> {
        Ok(self.store.read().orders.get(&id).cloned())
    }

    async fn upsert_order(&self, order: &Order) -> Result<(), PersistenceError> {
        let mut store = self.store.write();
        if let Some(stored) = store.orders.get(&order.id) {
            let reopens = stored.status().is_terminal() && !order.status().is_terminal();
            if stored.version() > order.version() || reopens {
                debug!(
                    order_id = %order.id,
                    stored_version = stored.version(),
                    incoming_version = order.version(),
                    "Ignoring stale order write"
                );
                return Ok(());
            }
        }
        store.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn upsert_trade(&self, trade: &Trade) -> Result<(), PersistenceError> {
        self.store.write().trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn get_trade(&self, id: Uuid) -> Result<Option<Trade>, PersistenceError> {
        Ok(self.store.read().trades.get(&id).cloned())
    }

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<(), PersistenceError> {
        let mut store = self.store.write();
        if store.settlements.contains_key(&settlement.id) {
            return Err(PersistenceError::Backend(format!(
                "settlement {} already exists",
                settlement.id
            )));
        }
        store.index(settlement);
        store.settlements.insert(settlement.id, settlement.clone());
        Ok(())
    }

    async fn get_settlement(
        &self,
        id: SettlementId,
    ) -> Result<Option<Settlement>, PersistenceError> {
        Ok(self.store.read().settlements.get(&id).cloned())
    }

    async fn get_settlement_by_tx_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Settlement>, PersistenceError> {
        let store = self.store.read();
        Ok(store
            .tx_index
            .get(hash)
            .and_then(|id| store.settlements.get(id))
            .cloned())
    }

    async fn update_settlement(
        &self,
        id: SettlementId,
        patch: &SettlementPatch,
    ) -> Result<(), PersistenceError> {
        let mut store = self.store.write();
        if let Some(reason) = store.failing_update.take() {
            return Err(PersistenceError::Backend(reason));
        }
        let mut settlement = store
            .settlements
            .remove(&id)
            .ok_or_else(|| PersistenceError::NotFound(format!("settlement {id}")))?;
        settlement.apply_patch(patch.clone());
        store.index(&settlement);
        store.settlements.insert(id, settlement);
        Ok(())
    }

    async fn get_settlements_with_pending_tx(&self) -> Result<Vec<Settlement>, PersistenceError> {
        Ok(self
            .store
            .read()
            .settlements
            .values()
            .filter(|settlement| settlement.has_pending_tx())
            .cloned()
            .collect())
    }

    async fn get_active_settlements(&self) -> Result<Vec<Settlement>, PersistenceError> {
        Ok(self
            .store
            .read()
            .settlements
            .values()
            .filter(|settlement| !settlement.state().is_final())
            .cloned()
            .collect())
    }
}
