// ============================================================================
// Swap Clearing Engine Library
// Order matching and atomic-swap settlement for a crypto-asset venue
// ============================================================================

//! # Swap Clearing Engine
//!
//! Order books with pluggable matching and hash-time-locked settlement of
//! every trade across two ledgers.
//!
//! ## Features
//!
//! - **One actor per book**: submit and cancel on a book are applied in
//!   arrival order by the task that owns it
//! - **Pluggable matching** (standard price/time, merchant, OTC) chosen by
//!   the exchange's configured algorithm
//! - **Settlement coordinator** driving the HTLC state machine from ledger
//!   confirmations, deadlines and manual redeem/refund actions
//! - **Ledger listeners** polling broadcast hashes with backoff, recovered
//!   after a restart
//!
//! ## Example
//!
//! ```rust
//! use swap_clearing_engine::prelude::*;
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let exchange = Exchange::new("x1", "SWAP", "Swap Venue", MatchingAlgorithmType::Standard)
//!     .with_pair(AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)));
//! let persistence = Arc::new(InMemoryPersistence::new().with_exchange(exchange));
//! let ledgers = LedgerRegistry::new()
//!     .with_service(Arc::new(InMemoryLedger::new("ETH")))
//!     .with_service(Arc::new(InMemoryLedger::new("BTC")));
//!
//! let venue = TradingVenue::start(persistence, ledgers, Arc::new(NoOpEventHandler), EngineConfig::fast())
//!     .await
//!     .unwrap();
//!
//! let price = Decimal::new(5, 2);
//! venue
//!     .submit_order(Quote::limit("x1", "ETHBTC", "alice", Side::Buy, price, Decimal::ONE))
//!     .await
//!     .unwrap();
//! let result = venue
//!     .submit_order(Quote::limit("x1", "ETHBTC", "bob", Side::Sell, price, Decimal::ONE))
//!     .await
//!     .unwrap();
//!
//! let settlement = venue.get_settlement(result.trades[0].settlement_id).await.unwrap();
//! assert_eq!(settlement.state(), SettlementState::New);
//! venue.shutdown().await;
//! # });
//! ```

pub mod clearing;
pub mod dlt;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod interfaces;
pub mod numeric;
pub mod utils;
pub mod venue;

// Re-exports for convenience
pub mod prelude {
    pub use crate::clearing::SettlementCoordinator;
    pub use crate::domain::{
        Asset, AssetPair, ChannelType, EngineConfig, Exchange, FillPreference, HtlcTimeouts,
        MatchingAlgorithmType, Order, OrderBookSnapshot, OrderId, OrderStatus, OrderType, Quote,
        QuoteOptions, Settlement, SettlementId, SettlementState, Side, Trade, TradeState,
        TxState, TxType,
    };
    pub use crate::engine::{
        spawn_book, BookHandle, MatchingEngine, MatchingEngineBuilder, MatchingResult,
    };
    pub use crate::errors::{
        ConfigError, LedgerError, MatchingError, PersistenceError, SettlementError, VenueError,
    };
    pub use crate::interfaces::{
        EngineEvent, EventHandler, InMemoryLedger, InMemoryPersistence, LedgerRegistry,
        LedgerService, LoggingEventHandler, MatchingAlgorithm, NoOpEventHandler, Persistence,
    };
    pub use crate::venue::TradingVenue;
}

#[cfg(test)]
mod integration_tests {
    use super::prelude::*;
    use crate::interfaces::ChannelEventHandler;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn usd_exchange(algorithm: MatchingAlgorithmType) -> Exchange {
        Exchange::new("x1", "SWAP", "Swap Venue", algorithm)
            .with_pair(AssetPair::new(Asset::new("ETH", 8), Asset::new("USDC", 6)))
    }

    async fn venue(algorithm: MatchingAlgorithmType) -> (TradingVenue, Arc<InMemoryPersistence>) {
        let persistence = Arc::new(InMemoryPersistence::new().with_exchange(usd_exchange(algorithm)));
        let ledgers = LedgerRegistry::new()
            .with_service(Arc::new(InMemoryLedger::new("ETH")))
            .with_service(Arc::new(InMemoryLedger::new("USDC")));
        let venue = TradingVenue::start(
            persistence.clone(),
            ledgers,
            Arc::new(NoOpEventHandler),
            EngineConfig::fast(),
        )
        .await
        .unwrap();
        (venue, persistence)
    }

    fn limit(customer: &str, side: Side, price: Decimal, qty: Decimal) -> Quote {
        Quote::limit("x1", "ETHUSDC", customer, side, price, qty)
    }

    #[tokio::test]
    async fn test_end_to_end_matching() {
        let (venue, persistence) = venue(MatchingAlgorithmType::Standard).await;

        let a = venue
            .submit_order(limit("A", Side::Buy, dec!(100), dec!(10)))
            .await
            .unwrap();
        assert!(a.trades.is_empty());
        assert_eq!(a.book.best_bid(), Some(dec!(100)));

        let b = venue
            .submit_order(limit("B", Side::Sell, dec!(100), dec!(4)))
            .await
            .unwrap();
        assert_eq!(b.trades.len(), 1);
        assert_eq!(b.trades[0].quantity, dec!(4));
        assert_eq!(b.trades[0].price, dec!(100));
        assert_eq!(b.makers[0].unfilled(), dec!(6));

        let c = venue
            .submit_order(limit("C", Side::Sell, dec!(99), dec!(10)))
            .await
            .unwrap();
        assert_eq!(c.trades.len(), 1);
        assert_eq!(c.trades[0].quantity, dec!(6));
        assert_eq!(c.trades[0].price, dec!(100));
        assert_eq!(c.order.unfilled(), dec!(4));
        assert_eq!(c.order.status(), OrderStatus::PartiallyFilled);

        let book = venue.get_book("x1", "ETHUSDC").await.unwrap();
        assert!(book.bids.is_empty());
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.asks[0].price, dec!(99));
        assert_eq!(book.asks[0].quantity, dec!(4));

        // every trade opened a settlement with the seller initiating
        let settlements = persistence.settlements();
        assert_eq!(settlements.len(), 2);
        assert!(settlements
            .iter()
            .all(|settlement| settlement.state() == SettlementState::New));
        let second = settlements
            .iter()
            .find(|settlement| settlement.id == c.trades[0].settlement_id)
            .unwrap();
        assert_eq!(second.initiator_id, "C");
        assert_eq!(second.participant_id, "A");
        assert_eq!(second.participate_channel.amount, dec!(600));

        venue.shutdown().await;
    }

    #[tokio::test]
    async fn test_otc_take_must_match_make_exactly() {
        let (venue, persistence) = venue(MatchingAlgorithmType::Otc).await;

        let make = venue
            .submit_order(limit("maker", Side::Sell, dec!(2000), dec!(3)))
            .await
            .unwrap();
        assert!(make.trades.is_empty());

        let short = limit("taker", Side::Buy, dec!(2000), dec!(2)).with_otc_reference(make.order.id);
        let result = venue.submit_order(short).await;
        assert!(matches!(
            result,
            Err(VenueError::Matching(MatchingError::OtcQuantityMismatch { .. }))
        ));

        let exact = limit("taker", Side::Buy, dec!(2000), dec!(3)).with_otc_reference(make.order.id);
        let take = venue.submit_order(exact).await.unwrap();
        assert_eq!(take.trades.len(), 1);
        assert_eq!(take.order.status(), OrderStatus::Filled);
        assert!(take.book.asks.is_empty());
        assert_eq!(persistence.settlements().len(), 1);

        venue.shutdown().await;
    }

    #[tokio::test]
    async fn test_market_order_without_liquidity_is_rejected() {
        let (venue, _) = venue(MatchingAlgorithmType::Standard).await;

        let result = venue
            .submit_order(Quote::market("x1", "ETHUSDC", "A", Side::Buy, dec!(1)))
            .await
            .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.order.status(), OrderStatus::Rejected);
        assert!(result.book.bids.is_empty());

        venue.shutdown().await;
    }

    #[test]
    fn test_book_events_reach_subscribers() {
        let (handler, events) = ChannelEventHandler::unbounded();
        let mut engine = MatchingEngineBuilder::new(
            "x1",
            AssetPair::new(Asset::new("ETH", 8), Asset::new("USDC", 6)),
        )
        .standard_matching()
        .build(Arc::new(handler))
        .unwrap();

        engine
            .submit(Order::new(limit("A", Side::Sell, dec!(10), dec!(1))))
            .unwrap();
        engine
            .submit(Order::new(limit("B", Side::Buy, dec!(10), dec!(1))))
            .unwrap();

        let fills: Vec<String> = events
            .try_iter()
            .filter_map(|event| match event {
                EngineEvent::OrderFill { customer_id, .. } => Some(customer_id),
                _ => None,
            })
            .collect();
        assert_eq!(fills, vec!["B".to_string(), "A".to_string()]);
    }

    // ========================================================================
    // Property tests
    // ========================================================================

    fn order_strategy() -> impl Strategy<Value = (u8, bool, u32, u32)> {
        (0u8..4, any::<bool>(), 95u32..105, 1u32..20)
    }

    proptest! {
        #[test]
        fn prop_matching_conserves_quantity(orders in prop::collection::vec(order_strategy(), 1..60)) {
            let mut engine = MatchingEngineBuilder::new(
                "x1",
                AssetPair::new(Asset::new("ETH", 8), Asset::new("USDC", 6)),
            )
            .build(Arc::new(NoOpEventHandler))
            .unwrap();

            let mut submitted: HashMap<OrderId, Decimal> = HashMap::new();
            let mut traded: HashMap<OrderId, Decimal> = HashMap::new();

            for (customer, buy, price, qty) in orders {
                let side = if buy { Side::Buy } else { Side::Sell };
                let quote = limit(&format!("c{customer}"), side, Decimal::from(price), Decimal::from(qty));
                let order = Order::new(quote);
                submitted.insert(order.id, order.quote.quantity);

                let result = engine.submit(order).unwrap();
                for trade in &result.trades {
                    prop_assert!(trade.quantity > Decimal::ZERO);
                    prop_assert_ne!(&trade.make_customer_id, &trade.take_customer_id);
                    prop_assert_ne!(trade.make_side, trade.take_side);
                    *traded.entry(trade.make_order_id).or_default() += trade.quantity;
                    *traded.entry(trade.take_order_id).or_default() += trade.quantity;
                }
                prop_assert_eq!(
                    result.trades.iter().map(|trade| trade.quantity).sum::<Decimal>(),
                    result.order.filled()
                );
            }

            for (id, quantity) in &traded {
                prop_assert!(quantity <= &submitted[id]);
            }
            for order in engine.open_orders() {
                let filled = traded.get(&order.id).copied().unwrap_or_default();
                prop_assert_eq!(order.unfilled() + filled, submitted[&order.id]);
            }
        }
    }
}
