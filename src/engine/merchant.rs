// ============================================================================
// Merchant Matching Algorithm
// Price/time descent restricted to merchant <-> retail pairs
// ============================================================================

use super::standard::descend;
use crate::domain::{Order, OrderBook};
use crate::errors::MatchingError;
use crate::interfaces::{can_match_base, MatchOutcome, MatchingAlgorithm};

/// Merchant matching
///
/// Exactly one side of every trade must be a merchant order (one carrying a
/// `merchant_id`). Merchant-to-merchant and retail-to-retail pairs never
/// trade; such orders rest until a counter-party of the other kind arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct MerchantMatching;

impl MerchantMatching {
    fn is_merchant(order: &Order) -> bool {
        order.quote.options.merchant_id.is_some()
    }
}

impl MatchingAlgorithm for MerchantMatching {
    fn name(&self) -> &str {
        "merchant"
    }

    fn can_match(&self, a: &Order, b: &Order) -> bool {
        can_match_base(a, b) && Self::is_merchant(a) != Self::is_merchant(b)
    }

    fn submit(&self, book: &mut OrderBook, order: Order) -> Result<MatchOutcome, MatchingError> {
        descend(self, book, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetPair, Quote, Side};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::new(
            "x1",
            AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)),
        )
    }

    fn retail(customer: &str, side: Side, quantity: Decimal) -> Order {
        Order::new(Quote::limit("x1", "ETHBTC", customer, side, dec!(100), quantity))
    }

    fn merchant(customer: &str, side: Side, quantity: Decimal) -> Order {
        Order::new(
            Quote::limit("x1", "ETHBTC", customer, side, dec!(100), quantity)
                .with_merchant("m-1"),
        )
    }

    #[test]
    fn test_exactly_one_merchant() {
        let algo = MerchantMatching;
        assert!(algo.can_match(&merchant("m", Side::Sell, dec!(1)), &retail("r", Side::Buy, dec!(1))));
        assert!(!algo.can_match(&retail("a", Side::Sell, dec!(1)), &retail("b", Side::Buy, dec!(1))));
        assert!(!algo.can_match(
            &merchant("a", Side::Sell, dec!(1)),
            &merchant("b", Side::Buy, dec!(1))
        ));
    }

    #[test]
    fn test_retail_skips_retail_liquidity() {
        let mut book = book();
        let algo = MerchantMatching;

        algo.submit(&mut book, retail("r1", Side::Sell, dec!(2))).unwrap();
        let merchant_ask = merchant("m1", Side::Sell, dec!(2));
        let merchant_id = merchant_ask.id;
        algo.submit(&mut book, merchant_ask).unwrap();

        let outcome = algo
            .submit(&mut book, retail("r2", Side::Buy, dec!(3)))
            .unwrap();

        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].make_order_id, merchant_id);
        assert_eq!(outcome.order.unfilled(), dec!(1));
        // retail residue rests next to the retail ask it could not take
        assert!(outcome.rested);
        assert_eq!(book.len(), 2);
    }
}
