// ============================================================================
// Order Book Domain Model
// Two price-ordered trees of FIFO order lists, one book per exchange and pair
// ============================================================================

use super::{AssetPair, Order, OrderId, Side};
use crate::errors::MatchingError;
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

// ============================================================================
// Order List
// ============================================================================

/// Orders resting at one price, oldest first.
#[derive(Debug, Clone, Default)]
pub struct OrderList {
    orders: VecDeque<Order>,
}

impl OrderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping ascending arrival sequence. New orders always carry the
    /// highest sequence and land at the tail.
    pub fn insert(&mut self, order: Order) {
        let position = self
            .orders
            .iter()
            .rposition(|resting| resting.sequence <= order.sequence)
            .map_or(0, |index| index + 1);
        self.orders.insert(position, order);
    }

    pub fn head(&self) -> Option<&Order> {
        self.orders.front()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Order> {
        self.orders.get_mut(index)
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Order> {
        self.orders.remove(index)
    }

    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let index = self.orders.iter().position(|order| order.id == order_id)?;
        self.orders.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_unfilled(&self) -> Quantity {
        self.orders.iter().map(Order::unfilled).sum()
    }
}

// ============================================================================
// Order Tree
// ============================================================================

/// One side of the book: price -> FIFO list.
#[derive(Debug, Clone)]
pub struct OrderTree {
    pub side: Side,
    levels: BTreeMap<Price, OrderList>,
}

impl OrderTree {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, order: Order) -> Result<(), MatchingError> {
        let price = order.price().ok_or_else(|| {
            MatchingError::InvalidQuote("only priced orders can rest in the book".to_string())
        })?;
        self.levels.entry(price).or_default().insert(order);
        Ok(())
    }

    /// Get the best (top-of-book) price
    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            // Highest bid (last in sorted order)
            Side::Buy => self.levels.keys().next_back().copied(),
            // Lowest ask (first in sorted order)
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    /// Prices from best to worst
    pub fn prices(&self) -> Vec<Price> {
        match self.side {
            Side::Buy => self.levels.keys().rev().copied().collect(),
            Side::Sell => self.levels.keys().copied().collect(),
        }
    }

    pub fn level(&self, price: &Price) -> Option<&OrderList> {
        self.levels.get(price)
    }

    pub fn level_mut(&mut self, price: &Price) -> Option<&mut OrderList> {
        self.levels.get_mut(price)
    }

    pub fn remove(&mut self, order_id: OrderId, price: &Price) -> Option<Order> {
        let level = self.levels.get_mut(price)?;
        let order = level.remove(order_id);
        self.prune(price);
        order
    }

    /// Drop the level at `price` if it no longer holds orders
    pub fn prune(&mut self, price: &Price) {
        if self.levels.get(price).is_some_and(OrderList::is_empty) {
            self.levels.remove(price);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Levels from best to worst, at most `num_levels` of them
    pub fn depth(&self, num_levels: usize) -> Vec<OrderBookLevel> {
        let iter: Box<dyn Iterator<Item = (&Price, &OrderList)>> = match self.side {
            Side::Buy => Box::new(self.levels.iter().rev()),
            Side::Sell => Box::new(self.levels.iter()),
        };

        iter.take(num_levels)
            .map(|(price, list)| OrderBookLevel {
                price: *price,
                quantity: list.total_unfilled(),
                orders: list.iter().map(|order| order.id).collect(),
            })
            .collect()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.levels.values().flat_map(OrderList::iter)
    }
}

// ============================================================================
// Order Book
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub exchange_id: String,
    pub pair: AssetPair,
    pub bids: OrderTree,
    pub asks: OrderTree,
    /// Resting order -> (side, price) for cancellation
    locations: HashMap<OrderId, (Side, Price)>,
    next_sequence: u64,
}

impl OrderBook {
    pub fn new(exchange_id: impl Into<String>, pair: AssetPair) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            pair,
            bids: OrderTree::new(Side::Buy),
            asks: OrderTree::new(Side::Sell),
            locations: HashMap::new(),
            next_sequence: 1,
        }
    }

    pub fn tree(&self, side: Side) -> &OrderTree {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn tree_mut(&mut self, side: Side) -> &mut OrderTree {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Check that an order was addressed to this book
    pub fn ensure_belongs(&self, order: &Order) -> Result<(), MatchingError> {
        if order.quote.exchange_id != self.exchange_id || order.quote.pair != self.pair.symbol {
            return Err(MatchingError::BookMismatch {
                exchange_id: order.quote.exchange_id.clone(),
                pair: order.quote.pair.clone(),
                book_exchange: self.exchange_id.clone(),
                book_pair: self.pair.symbol.clone(),
            });
        }
        Ok(())
    }

    /// Stamp the next arrival sequence on an incoming order
    pub fn sequence(&mut self, order: &mut Order) {
        order.sequence = self.next_sequence;
        self.next_sequence += 1;
    }

    /// Rest an order on its own side. Orders that never passed through
    /// `sequence` (sequence 0) are stamped first; persisted orders keep theirs.
    pub fn rest(&mut self, mut order: Order) -> Result<(), MatchingError> {
        if order.unfilled() <= Decimal::ZERO {
            return Err(MatchingError::NotResting(order.id));
        }
        if order.sequence == 0 {
            self.sequence(&mut order);
        } else {
            self.next_sequence = self.next_sequence.max(order.sequence + 1);
        }

        let id = order.id;
        let side = order.side();
        let price = order.price().ok_or_else(|| {
            MatchingError::InvalidQuote("only priced orders can rest in the book".to_string())
        })?;
        self.tree_mut(side).insert(order)?;
        self.locations.insert(id, (side, price));
        Ok(())
    }

    /// Forget the location of an order that left its list during matching
    pub fn forget(&mut self, order_id: OrderId) {
        self.locations.remove(&order_id);
    }

    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let (side, price) = self.locations.remove(&order_id)?;
        self.tree_mut(side).remove(order_id, &price)
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        let (side, price) = self.locations.get(&order_id)?;
        self.tree(*side)
            .level(price)?
            .iter()
            .find(|order| order.id == order_id)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.locations.contains_key(&order_id)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// All resting orders, bids then asks, in arrival order within a level
    pub fn open_orders(&self) -> Vec<Order> {
        self.bids.orders().chain(self.asks.orders()).cloned().collect()
    }

    /// Consistent view of the book, `depth` levels per side
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot::with_depth(
            self.exchange_id.clone(),
            self.pair.symbol.clone(),
            self.bids.depth(depth),
            self.asks.depth(depth),
        )
    }

    /// Snapshot including every level
    pub fn full_snapshot(&self) -> OrderBookSnapshot {
        self.snapshot(usize::MAX)
    }
}

// ============================================================================
// Order Book Snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Price,
    /// Total unfilled quantity at this price
    pub quantity: Quantity,
    /// Resting order ids, oldest first
    pub orders: Vec<OrderId>,
}

/// Immutable snapshot of the order book state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub exchange_id: String,
    pub pair: String,
    /// Bid levels, best first
    pub bids: Vec<OrderBookLevel>,
    /// Ask levels, best first
    pub asks: Vec<OrderBookLevel>,
    /// Current spread (ask - bid)
    pub spread: Option<Decimal>,
    /// Mid price
    pub mid_price: Option<Decimal>,
}

impl OrderBookSnapshot {
    pub fn with_depth(
        exchange_id: String,
        pair: String,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
    ) -> Self {
        let (spread, mid_price) = match (bids.first(), asks.first()) {
            (Some(bid), Some(ask)) => (
                Some(ask.price - bid.price),
                Some((bid.price + ask.price) / Decimal::from(2)),
            ),
            _ => (None, None),
        };

        Self {
            exchange_id,
            pair,
            bids,
            asks,
            spread,
            mid_price,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|level| level.price)
    }

    pub fn total_bid_quantity(&self) -> Quantity {
        self.bids.iter().map(|level| level.quantity).sum()
    }

    pub fn total_ask_quantity(&self) -> Quantity {
        self.asks.iter().map(|level| level.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, Quote};
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::new(
            "x1",
            AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)),
        )
    }

    fn limit(customer: &str, side: Side, price: Decimal, quantity: Decimal) -> Order {
        Order::new(Quote::limit("x1", "ETHBTC", customer, side, price, quantity))
    }

    #[test]
    fn test_order_list_fifo() {
        let mut list = OrderList::new();
        let mut first = limit("user1", Side::Buy, dec!(100), dec!(1));
        first.sequence = 1;
        let mut second = limit("user2", Side::Buy, dec!(100), dec!(2));
        second.sequence = 2;

        // out-of-order insertion still yields arrival order
        list.insert(second.clone());
        list.insert(first.clone());

        let ids: Vec<_> = list.iter().map(|order| order.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(list.total_unfilled(), dec!(3));
    }

    #[test]
    fn test_best_price() {
        let mut book = book();
        book.rest(limit("user1", Side::Buy, dec!(100), dec!(1))).unwrap();
        book.rest(limit("user2", Side::Buy, dec!(101), dec!(1))).unwrap();
        book.rest(limit("user3", Side::Sell, dec!(105), dec!(1))).unwrap();
        book.rest(limit("user4", Side::Sell, dec!(103), dec!(1))).unwrap();

        // Best bid should be highest price, best ask the lowest
        assert_eq!(book.bids.best_price(), Some(dec!(101)));
        assert_eq!(book.asks.best_price(), Some(dec!(103)));
        assert_eq!(book.asks.prices(), vec![dec!(103), dec!(105)]);
    }

    #[test]
    fn test_remove_prunes_level() {
        let mut book = book();
        let order = limit("user1", Side::Sell, dec!(100), dec!(1));
        let id = order.id;
        book.rest(order).unwrap();

        assert!(book.contains(id));
        assert!(book.remove(id).is_some());
        assert!(book.asks.is_empty());
        assert!(book.remove(id).is_none());
    }

    #[test]
    fn test_market_order_cannot_rest() {
        let mut book = book();
        let order = Order::new(Quote::market("x1", "ETHBTC", "user1", Side::Buy, dec!(1)));
        assert!(matches!(
            book.rest(order),
            Err(MatchingError::InvalidQuote(_))
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn test_order_book_snapshot() {
        let mut book = book();
        book.rest(limit("user1", Side::Buy, dec!(100), dec!(1))).unwrap();
        book.rest(limit("user2", Side::Buy, dec!(100), dec!(2))).unwrap();
        book.rest(limit("user3", Side::Sell, dec!(101), dec!(2))).unwrap();

        let snapshot = book.snapshot(10);
        assert_eq!(snapshot.best_bid(), Some(dec!(100)));
        assert_eq!(snapshot.best_ask(), Some(dec!(101)));
        assert_eq!(snapshot.spread, Some(dec!(1)));
        assert_eq!(snapshot.mid_price, Some(dec!(100.5)));
        assert_eq!(snapshot.bids[0].orders.len(), 2);
        assert_eq!(snapshot.total_bid_quantity(), dec!(3));
    }
}
