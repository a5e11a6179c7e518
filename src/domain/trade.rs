// ============================================================================
// Trade Domain Model
// ============================================================================

use super::{Order, OrderId, SettlementId, Side};
use crate::numeric::{notional, NumericResult, Price, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    Matched,
    Settled,
    SettlementError,
}

/// Represents a matched trade between a resting and an incoming order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade identifier
    pub id: Uuid,

    pub exchange_id: String,

    /// Asset pair symbol
    pub pair: String,

    /// Passive order (resting in book)
    pub make_order_id: OrderId,
    pub make_customer_id: String,
    pub make_side: Side,

    /// Aggressive order (incoming)
    pub take_order_id: OrderId,
    pub take_customer_id: String,
    pub take_side: Side,

    /// Execution price (the make order's price)
    pub price: Price,

    /// Executed quantity
    pub quantity: Quantity,

    /// Settlement that clears this trade
    pub settlement_id: SettlementId,

    pub state: TradeState,

    /// Trade timestamp
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn new(make: &Order, take: &Order, price: Price, quantity: Quantity) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange_id: take.quote.exchange_id.clone(),
            pair: take.quote.pair.clone(),
            make_order_id: make.id,
            make_customer_id: make.quote.customer_id.clone(),
            make_side: make.side(),
            take_order_id: take.id,
            take_customer_id: take.quote.customer_id.clone(),
            take_side: take.side(),
            price,
            quantity,
            settlement_id: SettlementId::new(),
            state: TradeState::Matched,
            timestamp: Utc::now(),
        }
    }

    /// Customer on the selling side of the trade
    pub fn seller_id(&self) -> &str {
        match self.make_side {
            Side::Sell => &self.make_customer_id,
            Side::Buy => &self.take_customer_id,
        }
    }

    /// Customer on the buying side of the trade
    pub fn buyer_id(&self) -> &str {
        match self.make_side {
            Side::Buy => &self.make_customer_id,
            Side::Sell => &self.take_customer_id,
        }
    }

    /// Whether `order_id` took part in this trade
    pub fn involves(&self, order_id: OrderId) -> bool {
        self.make_order_id == order_id || self.take_order_id == order_id
    }

    /// Quote-asset value of the trade (price * quantity) at the given precision.
    pub fn notional_value(&self, quote_decimals: u32) -> NumericResult<Price> {
        notional(self.price, self.quantity, quote_decimals)
    }

    /// Move out of MATCHED. Returns false when the trade already left MATCHED.
    pub fn conclude(&mut self, state: TradeState) -> bool {
        if self.state != TradeState::Matched || state == TradeState::Matched {
            return false;
        }
        self.state = state;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Quote;
    use rust_decimal_macros::dec;

    fn orders() -> (Order, Order) {
        let make = Order::new(Quote::limit("x1", "ETHBTC", "alice", Side::Buy, dec!(100), dec!(10)));
        let take = Order::new(Quote::limit("x1", "ETHBTC", "bob", Side::Sell, dec!(100), dec!(4)));
        (make, take)
    }

    #[test]
    fn test_trade_creation() {
        let (make, take) = orders();
        let trade = Trade::new(&make, &take, dec!(100), dec!(4));

        assert_eq!(trade.pair, "ETHBTC");
        assert_eq!(trade.make_order_id, make.id);
        assert_eq!(trade.take_order_id, take.id);
        assert_eq!(trade.buyer_id(), "alice");
        assert_eq!(trade.seller_id(), "bob");
        assert_eq!(trade.state, TradeState::Matched);
        assert_eq!(trade.notional_value(8).unwrap(), dec!(400));
    }

    #[test]
    fn test_conclude_once() {
        let (make, take) = orders();
        let mut trade = Trade::new(&make, &take, dec!(100), dec!(4));

        assert!(trade.conclude(TradeState::Settled));
        assert!(!trade.conclude(TradeState::SettlementError));
        assert_eq!(trade.state, TradeState::Settled);
    }
}
