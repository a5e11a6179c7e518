// ============================================================================
// OTC Matching Algorithm
// Standing make orders, taken only by exact reference
// ============================================================================

use super::standard::rest_residue;
use crate::domain::{Order, OrderBook, Trade};
use crate::errors::MatchingError;
use crate::interfaces::{can_match_base, MatchOutcome, MatchingAlgorithm, Trades};
use tracing::debug;

/// Over-the-counter matching
///
/// Orders without an `otc_order_id` are makes: they rest without matching.
/// Orders carrying one are takes: they must trade the referenced make in
/// full at its exact price, or are rejected in full. Takes never rest.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtcMatching;

impl OtcMatching {
    /// Every reason `take` cannot trade `make`, first failure wins.
    fn check_take(make: &Order, take: &Order) -> Result<(), MatchingError> {
        let take_price = take.price().ok_or(MatchingError::OtcMissingPrice)?;

        if make.customer_id() == take.customer_id() {
            return Err(MatchingError::OtcSameCustomer(make.id));
        }
        if make.side() == take.side() {
            return Err(MatchingError::OtcSameSide(make.id));
        }

        let make_price = make.price().ok_or(MatchingError::NotResting(make.id))?;
        if make_price != take_price {
            return Err(MatchingError::OtcPriceMismatch {
                make: make_price.to_string(),
                take: take_price.to_string(),
            });
        }
        if make.unfilled() != take.unfilled() {
            return Err(MatchingError::OtcQuantityMismatch {
                make: make.unfilled().to_string(),
                take: take.unfilled().to_string(),
            });
        }
        Ok(())
    }
}

impl MatchingAlgorithm for OtcMatching {
    fn name(&self) -> &str {
        "otc"
    }

    fn can_match(&self, a: &Order, b: &Order) -> bool {
        let addressed = a.quote.options.otc_order_id == Some(b.id)
            || b.quote.options.otc_order_id == Some(a.id);
        addressed
            && can_match_base(a, b)
            && a.price() == b.price()
            && a.unfilled() == b.unfilled()
    }

    fn submit(&self, book: &mut OrderBook, mut order: Order) -> Result<MatchOutcome, MatchingError> {
        book.ensure_belongs(&order)?;

        let Some(make_id) = order.quote.options.otc_order_id else {
            if order.is_market_order() {
                return Err(MatchingError::InvalidQuote(
                    "OTC make orders must carry a limit price".to_string(),
                ));
            }
            book.sequence(&mut order);
            let rested = rest_residue(book, &mut order)?;
            return Ok(MatchOutcome::unmatched(order, rested));
        };

        let make = book
            .get(make_id)
            .ok_or(MatchingError::UnknownOtcOrder(make_id))?;
        Self::check_take(make, &order)?;

        book.sequence(&mut order);
        let mut make = book
            .remove(make_id)
            .ok_or(MatchingError::UnknownOtcOrder(make_id))?;
        let price = make.price().ok_or(MatchingError::NotResting(make_id))?;
        let quantity = make.unfilled();

        make.fill(quantity)?;
        order.fill(quantity)?;
        debug!(make = %make.id, take = %order.id, %price, %quantity, "OTC order taken");

        let mut trades = Trades::new();
        trades.push(Trade::new(&make, &order, price, quantity));
        Ok(MatchOutcome {
            order,
            trades,
            makers: vec![make],
            rested: false,
        })
    }
}
