// ============================================================================
// Trading Venue
// Transport-facing operations over the books and the settlement coordinator
// ============================================================================

use crate::clearing::SettlementCoordinator;
use crate::dlt::{HookDispatcher, ListenerRegistry};
use crate::domain::{
    ChannelType, EngineConfig, Exchange, Order, OrderBookSnapshot, OrderId, Quote, Settlement,
    SettlementId,
};
use crate::engine::factory::create_for_exchange;
use crate::engine::{spawn_book, BookHandle, MatchingResult};
use crate::errors::{ConfigError, MatchingError, VenueError};
use crate::interfaces::{EventHandler, LedgerRegistry, OrderFilter, Persistence};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

type BookKey = (String, String);

/// A running venue: one book actor per (exchange, pair), the ledger
/// listeners, the hook dispatcher and the timeout sweep.
pub struct TradingVenue {
    persistence: Arc<dyn Persistence>,
    exchanges: HashMap<String, Exchange>,
    books: HashMap<BookKey, BookHandle>,
    coordinator: Arc<SettlementCoordinator>,
    shutdown: watch::Sender<bool>,
    book_tasks: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl TradingVenue {
    /// Load venue configuration, warm-start the books, recover pending
    /// settlement transactions and spawn the background tasks.
    pub async fn start(
        persistence: Arc<dyn Persistence>,
        ledgers: LedgerRegistry,
        events: Arc<dyn EventHandler>,
        config: EngineConfig,
    ) -> Result<Self, VenueError> {
        config.validate()?;

        let assets: HashSet<String> = persistence
            .get_assets()
            .await?
            .into_iter()
            .map(|asset| asset.symbol)
            .collect();
        let exchanges = persistence.get_exchanges().await?;
        for exchange in &exchanges {
            exchange.validate()?;
            for asset in &exchange.assets {
                if !assets.contains(&asset.symbol) {
                    return Err(ConfigError::UnknownAsset {
                        asset: asset.symbol.clone(),
                        context: format!("exchange {}", exchange.id),
                    }
                    .into());
                }
                if ledgers.get(&asset.symbol).is_err() {
                    warn!(exchange = %exchange.id, asset = %asset.symbol, "no ledger service, trades in this asset cannot settle");
                }
            }
        }

        let (listeners, tx_events) = ListenerRegistry::build(&ledgers, &config)?;
        let listeners = Arc::new(listeners);
        let coordinator = Arc::new(SettlementCoordinator::new(
            Arc::clone(&persistence),
            ledgers,
            Arc::clone(&listeners),
            Arc::clone(&events),
            exchanges.iter().cloned(),
        ));

        let mut books = HashMap::new();
        let mut book_tasks = Vec::new();
        for exchange in &exchanges {
            for mut engine in create_for_exchange(exchange, &config, Arc::clone(&events))? {
                let filter = OrderFilter::for_book(exchange.id.clone(), engine.pair().symbol.clone());
                let open = persistence.get_open_orders(&filter).await?;
                engine.resubmit_orders(open)?;

                let key = (exchange.id.clone(), engine.pair().symbol.clone());
                let (handle, task) = spawn_book(engine, config.book_queue_capacity);
                books.insert(key, handle);
                book_tasks.push(task);
            }
        }

        coordinator.recover().await?;
        tokio::time::sleep(config.recheck_delay()).await;
        listeners.recheck_if_mined().await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut background = listeners.spawn_all(&shutdown_rx);
        background.push(tokio::spawn(
            HookDispatcher::new(Arc::clone(&coordinator), tx_events).run(shutdown_rx.clone()),
        ));
        background.push(tokio::spawn(
            Arc::clone(&coordinator).run_timeout_sweep(config.sweep_interval(), shutdown_rx),
        ));

        info!(
            exchanges = exchanges.len(),
            books = books.len(),
            listeners = listeners.len(),
            "trading venue started"
        );

        Ok(Self {
            persistence,
            exchanges: exchanges
                .into_iter()
                .map(|exchange| (exchange.id.clone(), exchange))
                .collect(),
            books,
            coordinator,
            shutdown,
            book_tasks,
            background,
        })
    }

    pub fn exchange(&self, exchange_id: &str) -> Option<&Exchange> {
        self.exchanges.get(exchange_id)
    }

    pub fn coordinator(&self) -> &Arc<SettlementCoordinator> {
        &self.coordinator
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Match a quote. Persists the order, the makers it touched and the
    /// trades, and opens one settlement per trade.
    pub async fn submit_order(&self, quote: Quote) -> Result<MatchingResult, VenueError> {
        let book = self.book(&quote.exchange_id, &quote.pair)?;
        let exchange = self
            .exchanges
            .get(&quote.exchange_id)
            .ok_or_else(|| MatchingError::UnknownAssetPair(quote.pair.clone()))?;

        let result = book.submit(Order::new(quote)).await?;

        self.persistence.upsert_order(&result.order).await?;
        for maker in &result.makers {
            self.persistence.upsert_order(maker).await?;
        }
        for trade in &result.trades {
            self.persistence.upsert_trade(trade).await?;
            let Some(maker) = result
                .makers
                .iter()
                .find(|maker| maker.id == trade.make_order_id)
            else {
                warn!(trade = %trade.id, maker = %trade.make_order_id, "trade without maker copy");
                continue;
            };
            self.coordinator
                .create_settlement(trade, exchange, maker, &result.order)
                .await?;
        }
        Ok(result)
    }

    /// Cancel a resting order. `None` when it no longer rests.
    pub async fn cancel_order(
        &self,
        exchange_id: &str,
        pair: &str,
        order_id: OrderId,
    ) -> Result<Option<Order>, VenueError> {
        let cancelled = self.book(exchange_id, pair)?.cancel(order_id).await?;
        if let Some(order) = &cancelled {
            self.persistence.upsert_order(order).await?;
        }
        Ok(cancelled)
    }

    pub async fn get_book(&self, exchange_id: &str, pair: &str) -> Result<OrderBookSnapshot, VenueError> {
        self.book(exchange_id, pair)?.snapshot(false).await
    }

    pub async fn get_full_book(
        &self,
        exchange_id: &str,
        pair: &str,
    ) -> Result<OrderBookSnapshot, VenueError> {
        self.book(exchange_id, pair)?.snapshot(true).await
    }

    // ========================================================================
    // Settlements
    // ========================================================================

    pub async fn get_settlement(&self, id: SettlementId) -> Result<Settlement, VenueError> {
        Ok(self.coordinator.get_settlement(id).await?)
    }

    pub async fn settle(
        &self,
        id: SettlementId,
        channel_type: ChannelType,
        secret_hash: Option<String>,
    ) -> Result<Settlement, VenueError> {
        Ok(self.coordinator.settle(id, channel_type, secret_hash).await?)
    }

    pub async fn redeem(
        &self,
        id: SettlementId,
        channel_type: ChannelType,
        secret: Option<String>,
    ) -> Result<Settlement, VenueError> {
        Ok(self.coordinator.redeem(id, channel_type, secret).await?)
    }

    pub async fn refund(
        &self,
        id: SettlementId,
        channel_type: ChannelType,
    ) -> Result<Settlement, VenueError> {
        Ok(self.coordinator.refund(id, channel_type).await?)
    }

    /// Stop the background tasks, then the book actors.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.background {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }

        // book actors exit once every handle is gone
        drop(self.books);
        for task in self.book_tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "book task ended abnormally");
            }
        }
        info!("trading venue stopped");
    }

    fn book(&self, exchange_id: &str, pair: &str) -> Result<&BookHandle, MatchingError> {
        self.books
            .get(&(exchange_id.to_string(), pair.to_string()))
            .ok_or_else(|| MatchingError::UnknownAssetPair(format!("{exchange_id}/{pair}")))
    }
}
