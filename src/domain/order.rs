// ============================================================================
// Quote and Order Domain Model
// ============================================================================

use super::AssetPair;
use crate::errors::MatchingError;
use crate::numeric::{ensure_precision, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// How an order accepts being filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillPreference {
    /// Any number of partial fills
    #[default]
    Partial,
    /// The whole unfilled quantity in a single trade
    Complete,
}

/// Options bag that parameterizes the matching algorithm variants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteOptions {
    pub fill_preference: FillPreference,
    /// Smallest trade quantity this order accepts
    pub fill_lower_bound: Option<Quantity>,
    /// Set on orders placed by a merchant (merchant matching)
    pub merchant_id: Option<String>,
    /// Make order addressed by an OTC take order
    pub otc_order_id: Option<OrderId>,
}

// ============================================================================
// Quote
// ============================================================================

/// Customer-submitted order intent. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub exchange_id: String,
    /// Asset pair symbol, e.g. "ETHBTC"
    pub pair: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Absent for market orders
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub customer_id: String,
    pub customer_ref_id: String,
    /// Address the customer's outgoing asset is locked from
    pub send_address: String,
    /// Address the customer's incoming asset is paid to
    pub receive_address: String,
    pub options: QuoteOptions,
    pub submitted_at: DateTime<Utc>,
}

impl Quote {
    pub fn limit(
        exchange_id: impl Into<String>,
        pair: impl Into<String>,
        customer_id: impl Into<String>,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self::new(exchange_id, pair, customer_id, side, OrderType::Limit, Some(price), quantity)
    }

    pub fn market(
        exchange_id: impl Into<String>,
        pair: impl Into<String>,
        customer_id: impl Into<String>,
        side: Side,
        quantity: Quantity,
    ) -> Self {
        Self::new(exchange_id, pair, customer_id, side, OrderType::Market, None, quantity)
    }

    fn new(
        exchange_id: impl Into<String>,
        pair: impl Into<String>,
        customer_id: impl Into<String>,
        side: Side,
        order_type: OrderType,
        price: Option<Price>,
        quantity: Quantity,
    ) -> Self {
        let customer_id = customer_id.into();
        Self {
            exchange_id: exchange_id.into(),
            pair: pair.into(),
            side,
            order_type,
            price,
            quantity,
            send_address: format!("{}-send", customer_id),
            receive_address: format!("{}-receive", customer_id),
            customer_ref_id: Uuid::new_v4().to_string(),
            customer_id,
            options: QuoteOptions::default(),
            submitted_at: Utc::now(),
        }
    }

    /// Builder method: set settlement addresses
    pub fn with_addresses(
        mut self,
        send_address: impl Into<String>,
        receive_address: impl Into<String>,
    ) -> Self {
        self.send_address = send_address.into();
        self.receive_address = receive_address.into();
        self
    }

    /// Builder method: set the customer's own reference
    pub fn with_customer_ref(mut self, customer_ref_id: impl Into<String>) -> Self {
        self.customer_ref_id = customer_ref_id.into();
        self
    }

    /// Builder method: replace the options bag
    pub fn with_options(mut self, options: QuoteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.options.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_otc_reference(mut self, otc_order_id: OrderId) -> Self {
        self.options.otc_order_id = Some(otc_order_id);
        self
    }

    /// Validate the quote against the pair it trades
    pub fn validate(&self, pair: &AssetPair) -> Result<(), MatchingError> {
        if self.pair != pair.symbol {
            return Err(MatchingError::UnknownAssetPair(self.pair.clone()));
        }

        if self.customer_id.trim().is_empty() {
            return Err(MatchingError::InvalidQuote(
                "customer id is required".to_string(),
            ));
        }

        if self.quantity <= Decimal::ZERO {
            return Err(MatchingError::InvalidQuote(
                "quantity must be positive".to_string(),
            ));
        }
        ensure_precision(self.quantity, pair.base.decimals)?;

        match (self.order_type, self.price) {
            (OrderType::Limit, None) => {
                return Err(MatchingError::InvalidQuote(
                    "limit orders must have a price".to_string(),
                ));
            },
            (OrderType::Limit, Some(price)) => {
                if price <= Decimal::ZERO {
                    return Err(MatchingError::InvalidQuote(
                        "price must be positive".to_string(),
                    ));
                }
                ensure_precision(price, pair.quote.decimals)?;
            },
            (OrderType::Market, Some(_)) => {
                return Err(MatchingError::InvalidQuote(
                    "market orders must not carry a price".to_string(),
                ));
            },
            (OrderType::Market, None) => {},
        }

        if let Some(bound) = self.options.fill_lower_bound {
            if bound <= Decimal::ZERO || bound > self.quantity {
                return Err(MatchingError::InvalidQuote(format!(
                    "fill lower bound {} outside (0, {}]",
                    bound, self.quantity
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Order Status State Machine
// ============================================================================

pub mod state {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    pub enum OrderStatus {
        New,
        Unfilled,
        PartiallyFilled,
        Filled,
        Cancelled,
        Rejected,
        Expired,
    }

    impl OrderStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                OrderStatus::Filled
                    | OrderStatus::Cancelled
                    | OrderStatus::Rejected
                    | OrderStatus::Expired
            )
        }

        pub fn is_open(&self) -> bool {
            matches!(self, OrderStatus::Unfilled | OrderStatus::PartiallyFilled)
        }
    }

    /// Valid state transitions for the order state machine
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OrderStatusTransition {
        Accept,
        Reject,
        PartialFill,
        Fill,
        Cancel,
        Expire,
    }

    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    #[error("invalid transition from {from:?} via {via:?}")]
    pub struct InvalidTransition {
        pub from: OrderStatus,
        pub via: OrderStatusTransition,
    }

    impl OrderStatus {
        pub fn transition(
            &self,
            transition: OrderStatusTransition,
        ) -> Result<OrderStatus, InvalidTransition> {
            use OrderStatus::*;
            use OrderStatusTransition::*;

            match (self, transition) {
                (New, Accept) => Ok(Unfilled),
                (New, Reject) => Ok(Rejected),
                (New, PartialFill) => Ok(PartiallyFilled),
                (New, Fill) => Ok(Filled),
                (New, Cancel) => Ok(Cancelled),

                (Unfilled, PartialFill) => Ok(PartiallyFilled),
                (Unfilled, Fill) => Ok(Filled),
                (Unfilled, Cancel) => Ok(Cancelled),
                (Unfilled, Expire) => Ok(Expired),

                (PartiallyFilled, PartialFill) => Ok(PartiallyFilled),
                (PartiallyFilled, Fill) => Ok(Filled),
                (PartiallyFilled, Cancel) => Ok(Cancelled),
                (PartiallyFilled, Expire) => Ok(Expired),

                _ => Err(InvalidTransition {
                    from: *self,
                    via: transition,
                }),
            }
        }
    }
}

use state::{OrderStatus, OrderStatusTransition};

// ============================================================================
// Order Entity
// ============================================================================

/// A quote plus mutable fill state. Owned by the order book while resting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub quote: Quote,
    filled: Quantity,
    status: OrderStatus,
    /// Book arrival sequence; orders at one price rest in ascending sequence
    pub sequence: u64,
    /// Bumped on every fill or transition; stores keep the highest version
    #[serde(default)]
    version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(quote: Quote) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            quote,
            filled: Decimal::ZERO,
            status: OrderStatus::New,
            sequence: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn filled(&self) -> Quantity {
        self.filled
    }

    pub fn unfilled(&self) -> Quantity {
        self.quote.quantity - self.filled
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn side(&self) -> Side {
        self.quote.side
    }

    pub fn price(&self) -> Option<Price> {
        self.quote.price
    }

    pub fn customer_id(&self) -> &str {
        &self.quote.customer_id
    }

    pub fn is_market_order(&self) -> bool {
        matches!(self.quote.order_type, OrderType::Market)
    }

    pub fn is_limit_order(&self) -> bool {
        matches!(self.quote.order_type, OrderType::Limit)
    }

    /// True while the order can still trade.
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal() && self.unfilled() > Decimal::ZERO
    }

    /// Whether this order's options allow a single trade of `quantity`.
    pub fn accepts_fill(&self, quantity: Quantity) -> bool {
        if let Some(bound) = self.quote.options.fill_lower_bound {
            if quantity < bound.min(self.unfilled()) {
                return false;
            }
        }
        match self.quote.options.fill_preference {
            FillPreference::Partial => true,
            FillPreference::Complete => quantity >= self.unfilled(),
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Record a fill. Rejects non-positive fills and overfills without
    /// changing any state.
    pub fn fill(&mut self, quantity: Quantity) -> Result<(), MatchingError> {
        if quantity <= Decimal::ZERO {
            return Err(MatchingError::NonPositiveFill(quantity.to_string()));
        }

        let unfilled = self.unfilled();
        if quantity > unfilled {
            return Err(MatchingError::Overfill {
                order_id: self.id,
                fill: quantity.to_string(),
                unfilled: unfilled.to_string(),
            });
        }

        let transition = if quantity == unfilled {
            OrderStatusTransition::Fill
        } else {
            OrderStatusTransition::PartialFill
        };
        let next = self
            .status
            .transition(transition)
            .map_err(|_| MatchingError::NotResting(self.id))?;

        self.filled += quantity;
        self.status = next;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a lifecycle transition (accept, reject, cancel, expire).
    pub fn apply(
        &mut self,
        transition: OrderStatusTransition,
    ) -> Result<OrderStatus, state::InvalidTransition> {
        let next = self.status.transition(transition)?;
        self.status = next;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Asset;
    use rust_decimal_macros::dec;

    fn pair() -> AssetPair {
        AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8))
    }

    fn limit(side: Side, price: Decimal, quantity: Decimal) -> Order {
        Order::new(Quote::limit("x1", "ETHBTC", "user123", side, price, quantity))
    }

    #[test]
    fn test_order_creation() {
        let order = limit(Side::Buy, dec!(0.05), dec!(1));

        assert_eq!(order.unfilled(), dec!(1));
        assert_eq!(order.filled(), Decimal::ZERO);
        assert_eq!(order.status(), OrderStatus::New);
    }

    #[test]
    fn test_fill() {
        let mut order = limit(Side::Buy, dec!(0.05), dec!(10));

        order.fill(dec!(3)).unwrap();
        assert_eq!(order.filled(), dec!(3));
        assert_eq!(order.unfilled(), dec!(7));
        assert_eq!(order.status(), OrderStatus::PartiallyFilled);

        order.fill(dec!(7)).unwrap();
        assert_eq!(order.status(), OrderStatus::Filled);
        assert!(!order.is_live());
    }

    #[test]
    fn test_version_tracks_mutations() {
        let mut order = limit(Side::Sell, dec!(0.05), dec!(4));
        assert_eq!(order.version(), 0);

        order.apply(OrderStatusTransition::Accept).unwrap();
        order.fill(dec!(1)).unwrap();
        assert_eq!(order.version(), 2);

        assert!(order.fill(dec!(9)).is_err());
        assert_eq!(order.version(), 2);

        order.apply(OrderStatusTransition::Cancel).unwrap();
        assert_eq!(order.version(), 3);
    }

    #[test]
    fn test_overfill_protection() {
        let mut order = limit(Side::Buy, dec!(0.05), dec!(5));

        assert!(matches!(
            order.fill(dec!(10)),
            Err(MatchingError::Overfill { .. })
        ));
        assert!(matches!(
            order.fill(dec!(0)),
            Err(MatchingError::NonPositiveFill(_))
        ));
        assert_eq!(order.filled(), Decimal::ZERO);
        assert_eq!(order.status(), OrderStatus::New);
    }

    #[test]
    fn test_fill_after_cancel_is_rejected() {
        let mut order = limit(Side::Sell, dec!(0.05), dec!(5));
        order.apply(OrderStatusTransition::Accept).unwrap();
        order.apply(OrderStatusTransition::Cancel).unwrap();

        assert!(matches!(
            order.fill(dec!(1)),
            Err(MatchingError::NotResting(_))
        ));
    }

    #[test]
    fn test_invalid_transition() {
        let mut order = limit(Side::Buy, dec!(0.05), dec!(1));
        order.fill(dec!(1)).unwrap();

        let err = order.apply(OrderStatusTransition::Cancel).unwrap_err();
        assert_eq!(err.from, OrderStatus::Filled);
    }

    #[test]
    fn test_accepts_fill_options() {
        let mut order = limit(Side::Buy, dec!(0.05), dec!(10));
        order.quote.options.fill_lower_bound = Some(dec!(4));
        assert!(!order.accepts_fill(dec!(3)));
        assert!(order.accepts_fill(dec!(4)));

        order.fill(dec!(8)).unwrap();
        // the residue below the bound can still be taken in full
        assert!(order.accepts_fill(dec!(2)));

        let mut complete = limit(Side::Sell, dec!(0.05), dec!(10));
        complete.quote.options.fill_preference = FillPreference::Complete;
        assert!(!complete.accepts_fill(dec!(9)));
        assert!(complete.accepts_fill(dec!(10)));
    }

    #[test]
    fn test_quote_validation() {
        let pair = pair();
        let quote = Quote::limit("x1", "ETHBTC", "alice", Side::Buy, dec!(0.05), dec!(1));
        assert!(quote.validate(&pair).is_ok());

        let no_price = Quote {
            price: None,
            ..quote.clone()
        };
        assert!(matches!(
            no_price.validate(&pair),
            Err(MatchingError::InvalidQuote(_))
        ));

        let market_with_price = Quote {
            order_type: OrderType::Market,
            ..quote.clone()
        };
        assert!(market_with_price.validate(&pair).is_err());

        let too_precise = Quote {
            quantity: dec!(0.000000001),
            ..quote.clone()
        };
        assert!(matches!(
            too_precise.validate(&pair),
            Err(MatchingError::Numeric(_))
        ));

        let wrong_pair = Quote {
            pair: "BTCUSD".to_string(),
            ..quote
        };
        assert!(matches!(
            wrong_pair.validate(&pair),
            Err(MatchingError::UnknownAssetPair(_))
        ));
    }

    #[test]
    fn test_order_round_trips_through_json() {
        let mut order = limit(Side::Sell, dec!(0.05123), dec!(2.5));
        order.fill(dec!(1.25)).unwrap();

        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"1.25\""));
        let restored: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, order);
    }
}
