// ============================================================================
// Standard Matching Algorithm (price/time priority)
// Descends the opposing tree best price first, FIFO within a level
// ============================================================================

use crate::domain::{Order, OrderBook, OrderStatus, OrderStatusTransition, Trade};
use crate::errors::MatchingError;
use crate::interfaces::{can_match_base, MatchOutcome, MatchingAlgorithm, Trades};
use rust_decimal::Decimal;
use tracing::debug;

/// Price/time priority matching
///
/// Resting orders at a better price trade first; at one price the oldest
/// compatible order trades first. Trades execute at the resting price.
///
/// # Example
/// ```text
/// Book:  100 @ 10 BUY (A)
///
/// Incoming: SELL 4 @ 100 (B)  -> trade 4 @ 100, A rests with 6
/// Incoming: SELL 10 @ 99 (C)  -> trade 6 @ 100, C rests with 4 @ 99
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMatching;

impl MatchingAlgorithm for StandardMatching {
    fn name(&self) -> &str {
        "standard"
    }

    fn can_match(&self, a: &Order, b: &Order) -> bool {
        can_match_base(a, b)
    }

    fn submit(&self, book: &mut OrderBook, order: Order) -> Result<MatchOutcome, MatchingError> {
        descend(self, book, order)
    }
}

/// Run `taker` down the opposing side of `book` using `algorithm`'s
/// predicates, then rest a LIMIT residue on its own side.
///
/// Incompatible resting orders are skipped and keep their queue position.
/// Every fill is bounded by both orders' unfilled quantity, so the invariant
/// checks in `Order::fill` run before any state of the pair changes.
pub(crate) fn descend<A>(
    algorithm: &A,
    book: &mut OrderBook,
    mut taker: Order,
) -> Result<MatchOutcome, MatchingError>
where
    A: MatchingAlgorithm + ?Sized,
{
    book.ensure_belongs(&taker)?;
    if taker.sequence == 0 {
        book.sequence(&mut taker);
    }

    let opposite = taker.side().opposite();
    let mut trades = Trades::new();
    let mut makers = Vec::new();

    for price in book.tree(opposite).prices() {
        if taker.unfilled() <= Decimal::ZERO || !algorithm.prices_cross(&taker, price) {
            break;
        }

        let mut index = 0;
        while taker.unfilled() > Decimal::ZERO {
            let Some(level) = book.tree_mut(opposite).level_mut(&price) else {
                break;
            };
            let Some(maker) = level.get_mut(index) else {
                break;
            };
            if !algorithm.can_match(maker, &taker) {
                index += 1;
                continue;
            }

            let quantity = maker.unfilled().min(taker.unfilled());
            maker.fill(quantity)?;
            taker.fill(quantity)?;
            trades.push(Trade::new(maker, &taker, price, quantity));
            debug!(
                maker = %maker.id,
                taker = %taker.id,
                %price,
                %quantity,
                "orders matched"
            );

            if maker.unfilled() > Decimal::ZERO {
                makers.push(maker.clone());
                index += 1;
                continue;
            }
            if let Some(filled) = level.remove_at(index) {
                book.forget(filled.id);
                makers.push(filled);
            }
        }

        book.tree_mut(opposite).prune(&price);
    }

    let rested = rest_residue(book, &mut taker)?;
    Ok(MatchOutcome {
        order: taker,
        trades,
        makers,
        rested,
    })
}

/// Rest an unfilled LIMIT order. Market orders never rest.
pub(crate) fn rest_residue(book: &mut OrderBook, order: &mut Order) -> Result<bool, MatchingError> {
    if !order.is_limit_order() || order.unfilled() <= Decimal::ZERO {
        return Ok(false);
    }
    if order.status() == OrderStatus::New {
        order
            .apply(OrderStatusTransition::Accept)
            .map_err(|_| MatchingError::NotResting(order.id))?;
    }
    book.rest(order.clone())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetPair, FillPreference, Quote, QuoteOptions, Side};
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
    fn test_fills_then_rests_residue() {
        let mut book = book();
        let algo = StandardMatching;

        let a = limit("A", Side::Buy, dec!(100), dec!(10));
        let a_id = a.id;
        algo.submit(&mut book, a).unwrap();

        let outcome = algo
            .submit(&mut book, limit("B", Side::Sell, dec!(100), dec!(4)))
            .unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].quantity, dec!(4));
        assert_eq!(book.get(a_id).unwrap().unfilled(), dec!(6));

        let outcome = algo
            .submit(&mut book, limit("C", Side::Sell, dec!(99), dec!(10)))
            .unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].price, dec!(100));
        assert_eq!(outcome.trades[0].quantity, dec!(6));
        assert!(outcome.rested);
        assert_eq!(outcome.makers[0].status(), OrderStatus::Filled);

        assert!(book.bids.is_empty());
        assert_eq!(book.asks.best_price(), Some(dec!(99)));
        assert_eq!(book.asks.level(&dec!(99)).unwrap().total_unfilled(), dec!(4));
    }

    #[test]
    fn test_time_priority_within_level() {
        let mut book = book();
        let algo = StandardMatching;

        let first = limit("A", Side::Sell, dec!(100), dec!(1));
        let second = limit("B", Side::Sell, dec!(100), dec!(1));
        let first_id = first.id;
        algo.submit(&mut book, first).unwrap();
        algo.submit(&mut book, second).unwrap();

        let outcome = algo
            .submit(&mut book, limit("C", Side::Buy, dec!(100), dec!(1)))
            .unwrap();
        assert_eq!(outcome.trades[0].make_order_id, first_id);
    }

    #[test]
    fn test_skips_own_orders_and_keeps_their_position() {
        let mut book = book();
        let algo = StandardMatching;

        let own = limit("A", Side::Sell, dec!(100), dec!(1));
        let own_id = own.id;
        algo.submit(&mut book, own).unwrap();
        algo.submit(&mut book, limit("B", Side::Sell, dec!(100), dec!(1)))
            .unwrap();

        let outcome = algo
            .submit(&mut book, limit("A", Side::Buy, dec!(100), dec!(2)))
            .unwrap();
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].make_customer_id, "B");
        assert!(outcome.rested);

        // A's sell stays at the head of its level
        let head = book.asks.level(&dec!(100)).unwrap().head().unwrap();
        assert_eq!(head.id, own_id);
    }

    #[test]
    fn test_market_order_never_rests() {
        let mut book = book();
        let algo = StandardMatching;
        algo.submit(&mut book, limit("A", Side::Sell, dec!(101), dec!(2)))
            .unwrap();
        algo.submit(&mut book, limit("B", Side::Sell, dec!(105), dec!(2)))
            .unwrap();

        let market = Order::new(Quote::market("x1", "ETHBTC", "C", Side::Buy, dec!(5)));
        let outcome = algo.submit(&mut book, market).unwrap();

        assert_eq!(outcome.traded_quantity(), dec!(4));
        assert_eq!(outcome.order.unfilled(), dec!(1));
        assert!(!outcome.rested);
        assert!(book.is_empty());
    }

    #[test]
    fn test_complete_fill_preference_waits_for_depth() {
        let mut book = book();
        let algo = StandardMatching;
        algo.submit(&mut book, limit("A", Side::Sell, dec!(100), dec!(3)))
            .unwrap();

        let all_or_nothing = Order::new(
            Quote::limit("x1", "ETHBTC", "B", Side::Buy, dec!(100), dec!(5)).with_options(
                QuoteOptions {
                    fill_preference: FillPreference::Complete,
                    ..Default::default()
                },
            ),
        );
        let outcome = algo.submit(&mut book, all_or_nothing).unwrap();

        assert!(outcome.trades.is_empty());
        assert!(outcome.rested);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_book_mismatch_rejected() {
        let mut book = book();
        let foreign = Order::new(Quote::limit("x2", "ETHBTC", "A", Side::Buy, dec!(1), dec!(1)));
        assert!(matches!(
            StandardMatching.submit(&mut book, foreign),
            Err(MatchingError::BookMismatch { .. })
        ));
    }
}
