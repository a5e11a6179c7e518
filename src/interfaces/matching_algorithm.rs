// ============================================================================
// Matching Algorithm Interface
// Defines the contract for pluggable matching algorithms
// ============================================================================

use crate::domain::{Order, OrderBook, Side, Trade};
use crate::errors::MatchingError;
use crate::numeric::Price;
use rust_decimal::Decimal;
use smallvec::SmallVec;

/// Trades produced by one submission. Most submissions touch few makers.
pub type Trades = SmallVec<[Trade; 4]>;

/// Result of running one incoming order through an algorithm
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// The incoming order after matching
    pub order: Order,
    pub trades: Trades,
    /// Updated copies of the resting orders touched by the match
    pub makers: Vec<Order>,
    /// Whether the order (or its residue) now rests in the book
    pub rested: bool,
}

impl MatchOutcome {
    pub fn unmatched(order: Order, rested: bool) -> Self {
        Self {
            order,
            trades: SmallVec::new(),
            makers: Vec::new(),
            rested,
        }
    }

    pub fn traded_quantity(&self) -> Decimal {
        self.trades.iter().map(|trade| trade.quantity).sum()
    }
}

/// Strategy interface for matching algorithms
/// Implementations: Standard (price/time), Merchant, OTC
pub trait MatchingAlgorithm: Send + Sync {
    /// Get the algorithm name for logging
    fn name(&self) -> &str;

    /// Whether `a` and `b` may trade with each other under this algorithm
    fn can_match(&self, a: &Order, b: &Order) -> bool;

    /// Run an incoming order against the book, resting any residue the
    /// algorithm keeps. Mutates `book` only on success.
    fn submit(&self, book: &mut OrderBook, order: Order) -> Result<MatchOutcome, MatchingError>;

    /// Check if an incoming order crosses a resting price.
    /// Market orders cross every price.
    fn prices_cross(&self, incoming: &Order, book_price: Price) -> bool {
        match (incoming.side(), incoming.price()) {
            (_, None) => true,
            (Side::Buy, Some(price)) => price >= book_price,
            (Side::Sell, Some(price)) => price <= book_price,
        }
    }
}

/// Compatibility predicate shared by every algorithm.
///
/// Both orders must trade on the same exchange and pair, sit on opposite
/// sides, belong to different customers and still be unfilled. Fill options
/// on either order must accept the would-be fill quantity.
pub fn can_match_base(a: &Order, b: &Order) -> bool {
    if a.quote.exchange_id != b.quote.exchange_id || a.quote.pair != b.quote.pair {
        return false;
    }
    if a.side() == b.side() || a.customer_id() == b.customer_id() {
        return false;
    }
    if !a.is_live() || !b.is_live() {
        return false;
    }

    let fill = a.unfilled().min(b.unfilled());
    a.accepts_fill(fill) && b.accepts_fill(fill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FillPreference, Quote, QuoteOptions};
    use rust_decimal_macros::dec;

    fn limit(customer: &str, side: Side, quantity: Decimal) -> Order {
        Order::new(Quote::limit("x1", "ETHBTC", customer, side, dec!(100), quantity))
    }

    #[test]
    fn test_base_predicate() {
        let buy = limit("alice", Side::Buy, dec!(1));
        let sell = limit("bob", Side::Sell, dec!(1));
        assert!(can_match_base(&buy, &sell));

        // self-match
        let own = limit("alice", Side::Sell, dec!(1));
        assert!(!can_match_base(&buy, &own));

        // same side
        let other_buy = limit("bob", Side::Buy, dec!(1));
        assert!(!can_match_base(&buy, &other_buy));

        // other pair
        let elsewhere = Order::new(Quote::limit("x1", "LTCBTC", "bob", Side::Sell, dec!(100), dec!(1)));
        assert!(!can_match_base(&buy, &elsewhere));
    }

    #[test]
    fn test_fill_options_refine_predicate() {
        let complete = Order::new(
            Quote::limit("x1", "ETHBTC", "alice", Side::Buy, dec!(100), dec!(10)).with_options(
                QuoteOptions {
                    fill_preference: FillPreference::Complete,
                    ..Default::default()
                },
            ),
        );
        assert!(!can_match_base(&complete, &limit("bob", Side::Sell, dec!(4))));
        assert!(can_match_base(&complete, &limit("bob", Side::Sell, dec!(12))));

        let bounded = Order::new(
            Quote::limit("x1", "ETHBTC", "alice", Side::Buy, dec!(100), dec!(10)).with_options(
                QuoteOptions {
                    fill_lower_bound: Some(dec!(5)),
                    ..Default::default()
                },
            ),
        );
        assert!(!can_match_base(&bounded, &limit("bob", Side::Sell, dec!(4))));
        assert!(can_match_base(&bounded, &limit("bob", Side::Sell, dec!(5))));
    }
}
