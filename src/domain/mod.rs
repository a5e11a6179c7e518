// ============================================================================
// Domain Models Module
// Contains all core domain entities and value objects
// ============================================================================

pub mod asset;
pub mod channel;
pub mod config;
pub mod exchange;
pub mod order;
pub mod order_book;
pub mod settlement;
pub mod trade;
pub mod transaction;

pub use asset::{Asset, AssetPair};
pub use channel::{Channel, ChannelType};
pub use config::EngineConfig;
pub use exchange::{Exchange, HtlcTimeouts, MatchingAlgorithmType};
pub use order::{FillPreference, Order, OrderId, OrderType, Quote, QuoteOptions, Side};
pub use order_book::{OrderBook, OrderBookLevel, OrderBookSnapshot, OrderList, OrderTree};
pub use settlement::{
    PendingTx, Settlement, SettlementId, SettlementPatch, SettlementState, StateRecord,
};
pub use trade::{Trade, TradeState};
pub use transaction::{Transaction, TxRegression, TxState, TxStateRecord, TxType};

// Re-export state machine
pub use order::state::{InvalidTransition, OrderStatus, OrderStatusTransition};
