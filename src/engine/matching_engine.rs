// ============================================================================
// Matching Engine
// Single-writer owner of one order book and its matching algorithm
// ============================================================================

use super::factory::Matcher;
use crate::domain::{
    AssetPair, Order, OrderBook, OrderBookSnapshot, OrderId, OrderStatus, OrderStatusTransition,
};
use crate::errors::MatchingError;
use crate::interfaces::{EngineEvent, EventHandler, MatchOutcome, MatchingAlgorithm, Trades};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a submission, with the book as it stands afterwards
#[derive(Debug, Clone)]
pub struct MatchingResult {
    pub book: OrderBookSnapshot,
    pub order: Order,
    pub trades: Trades,
    /// Updated copies of the resting orders that traded
    pub makers: Vec<Order>,
}

/// Matching engine for one (exchange, asset pair) book.
///
/// Methods take `&mut self`: the engine has exactly one writer, the book
/// actor that owns it.
pub struct MatchingEngine {
    book: OrderBook,
    algorithm: Matcher,
    event_handler: Arc<dyn EventHandler>,
    snapshot_depth: usize,
}

impl MatchingEngine {
    pub fn new(
        book: OrderBook,
        algorithm: Matcher,
        event_handler: Arc<dyn EventHandler>,
        snapshot_depth: usize,
    ) -> Self {
        Self {
            book,
            algorithm,
            event_handler,
            snapshot_depth,
        }
    }

    /// Validate and match a new order.
    ///
    /// A MARKET remainder never rests: an order that found no liquidity is
    /// REJECTED, a partially filled one is CANCELLED.
    pub fn submit(&mut self, order: Order) -> Result<MatchingResult, MatchingError> {
        if let Err(err) = self.validate_order(&order) {
            self.publish_rejection(&order, &err);
            return Err(err);
        }

        let outcome = match self.algorithm.submit(&mut self.book, order.clone()) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.publish_rejection(&order, &err);
                return Err(err);
            },
        };

        let MatchOutcome {
            mut order,
            trades,
            makers,
            rested,
        } = outcome;

        if order.is_market_order() && order.unfilled() > Decimal::ZERO {
            let transition = if order.filled() > Decimal::ZERO {
                OrderStatusTransition::Cancel
            } else {
                OrderStatusTransition::Reject
            };
            order
                .apply(transition)
                .map_err(|_| MatchingError::NotResting(order.id))?;
        }

        debug!(
            order = %order.id,
            algorithm = self.algorithm.name(),
            trades = trades.len(),
            status = ?order.status(),
            "order processed"
        );

        let book = self.snapshot();
        self.publish_outcome(&order, &trades, &makers, rested, &book);

        Ok(MatchingResult {
            book,
            order,
            trades,
            makers,
        })
    }

    /// Remove a resting order. Returns `None` when the order is not in the
    /// book (already filled, cancelled or unknown).
    pub fn cancel(&mut self, order_id: OrderId) -> Option<Order> {
        let mut order = self.book.remove(order_id)?;
        if order.apply(OrderStatusTransition::Cancel).is_err() {
            // only open orders rest, and open orders can always be cancelled
            debug!(order = %order_id, status = ?order.status(), "cancel on closed order");
        }

        let now = Utc::now();
        let book = self.snapshot();
        self.event_handler.on_events(vec![
            EngineEvent::OrderCancelled {
                order_id,
                customer_id: order.customer_id().to_string(),
                status: order.status(),
                timestamp: now,
            },
            EngineEvent::BookUpdate {
                snapshot: book,
                timestamp: now,
            },
        ]);
        Some(order)
    }

    /// Put a persisted open order back into the book without matching.
    pub fn resubmit_order(&mut self, order: Order) -> Result<(), MatchingError> {
        self.book.ensure_belongs(&order)?;
        if !order.status().is_open() || !order.is_live() {
            return Err(MatchingError::NotResting(order.id));
        }
        self.book.rest(order)
    }

    /// Warm-start the book from persisted open orders, oldest first.
    pub fn resubmit_orders(&mut self, orders: Vec<Order>) -> Result<usize, MatchingError> {
        let count = orders.len();
        for order in orders {
            self.resubmit_order(order)?;
        }
        info!(
            exchange = %self.book.exchange_id,
            pair = %self.book.pair.symbol,
            orders = count,
            "order book warm-started"
        );
        Ok(count)
    }

    /// Get order book snapshot at the configured depth
    pub fn snapshot(&self) -> OrderBookSnapshot {
        self.book.snapshot(self.snapshot_depth)
    }

    /// Snapshot of every level
    pub fn full_snapshot(&self) -> OrderBookSnapshot {
        self.book.full_snapshot()
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.book.open_orders()
    }

    pub fn exchange_id(&self) -> &str {
        &self.book.exchange_id
    }

    pub fn pair(&self) -> &AssetPair {
        &self.book.pair
    }

    pub fn algorithm_name(&self) -> &str {
        self.algorithm.name()
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn validate_order(&self, order: &Order) -> Result<(), MatchingError> {
        self.book.ensure_belongs(order)?;
        if order.status() != OrderStatus::New || order.filled() != Decimal::ZERO {
            return Err(MatchingError::InvalidQuote(
                "submitted orders must be new and unfilled".to_string(),
            ));
        }
        order.quote.validate(&self.book.pair)
    }

    fn publish_rejection(&self, order: &Order, err: &MatchingError) {
        debug!(order = %order.id, error = %err, "order rejected");
        self.event_handler.on_event(EngineEvent::OrderRejected {
            order_id: order.id,
            customer_id: order.customer_id().to_string(),
            reason: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_outcome(
        &self,
        order: &Order,
        trades: &Trades,
        makers: &[Order],
        rested: bool,
        book: &OrderBookSnapshot,
    ) {
        let now = Utc::now();
        let mut events = Vec::with_capacity(trades.len() * 2 + 2);

        for trade in trades {
            events.push(EngineEvent::OrderFill {
                customer_id: order.customer_id().to_string(),
                order: order.clone(),
                trade: trade.clone(),
                timestamp: now,
            });
            if let Some(maker) = makers.iter().rev().find(|maker| maker.id == trade.make_order_id) {
                events.push(EngineEvent::OrderFill {
                    customer_id: maker.customer_id().to_string(),
                    order: maker.clone(),
                    trade: trade.clone(),
                    timestamp: now,
                });
            }
        }

        if rested {
            if let Some(price) = order.price() {
                events.push(EngineEvent::OrderAddedToBook {
                    order_id: order.id,
                    customer_id: order.customer_id().to_string(),
                    price,
                    quantity: order.unfilled(),
                    timestamp: now,
                });
            }
        } else if matches!(order.status(), OrderStatus::Cancelled | OrderStatus::Rejected) {
            events.push(EngineEvent::OrderCancelled {
                order_id: order.id,
                customer_id: order.customer_id().to_string(),
                status: order.status(),
                timestamp: now,
            });
        }

        events.push(EngineEvent::BookUpdate {
            snapshot: book.clone(),
            timestamp: now,
        });
        self.event_handler.on_events(events);
    }
}
