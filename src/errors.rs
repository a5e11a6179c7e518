// ============================================================================
// Error Taxonomy
// Validation, matching, settlement, persistence and ledger errors
// ============================================================================

use crate::domain::{ChannelType, OrderId, SettlementId, SettlementState, TxType};
use crate::numeric::NumericError;
use thiserror::Error;

/// Venue configuration errors. Always fatal at configuration time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("symbol cannot be empty")]
    EmptySymbol,

    #[error("asset {asset} referenced by {context} is not configured")]
    UnknownAsset { asset: String, context: String },

    #[error("unsupported matching algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("commission must be within [0, 100): {0}")]
    InvalidCommission(String),

    #[error("invalid HTLC timeouts: {0}")]
    InvalidTimeouts(String),

    #[error("invalid engine configuration: {0}")]
    InvalidEngineConfig(String),

    #[error("malformed configuration document: {0}")]
    Malformed(String),
}

/// Errors surfaced synchronously to the order submitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchingError {
    #[error("order for {exchange_id}/{pair} submitted to book {book_exchange}/{book_pair}")]
    BookMismatch {
        exchange_id: String,
        pair: String,
        book_exchange: String,
        book_pair: String,
    },

    #[error("unknown asset pair {0}")]
    UnknownAssetPair(String),

    #[error("invalid quote: {0}")]
    InvalidQuote(String),

    #[error("OTC order {0} is not resting in the book")]
    UnknownOtcOrder(OrderId),

    #[error("OTC order {0} belongs to the submitting customer")]
    OtcSameCustomer(OrderId),

    #[error("OTC order {0} is on the same side as the take order")]
    OtcSameSide(OrderId),

    #[error("OTC take price {take} does not match make price {make}")]
    OtcPriceMismatch { make: String, take: String },

    #[error("OTC take quantity {take} does not match make quantity {make}")]
    OtcQuantityMismatch { make: String, take: String },

    #[error("OTC take order must carry a limit price")]
    OtcMissingPrice,

    #[error("fill of {fill} exceeds unfilled {unfilled} on order {order_id}")]
    Overfill {
        order_id: OrderId,
        fill: String,
        unfilled: String,
    },

    #[error("fill quantity must be positive, got {0}")]
    NonPositiveFill(String),

    #[error("order {0} is not resting in the book")]
    NotResting(OrderId),

    #[error(transparent)]
    Numeric(#[from] NumericError),
}

impl MatchingError {
    /// Invariant violations are programmer errors rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            MatchingError::Overfill { .. }
                | MatchingError::NonPositiveFill(_)
                | MatchingError::NotResting(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Network or node failure. The listener retries with backoff.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the request. Never retried.
    #[error("ledger rejected request: {0}")]
    Rejected(String),

    #[error("no ledger service configured for asset {0}")]
    UnsupportedAsset(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("settlement {0} not found")]
    NotFound(SettlementId),

    #[error("asset pair {0} is not configured on the exchange")]
    UnknownPair(String),

    #[error("no settlement owns transaction {0}")]
    UnknownTxHash(String),

    #[error("transaction hash {hash} is already bound to settlement {owner}")]
    DuplicateTxHash { hash: String, owner: SettlementId },

    #[error("{channel:?} {tx_type:?} transaction is not available yet")]
    ChannelNotReady { channel: ChannelType, tx_type: TxType },

    #[error("initiating a settlement requires a hashed secret")]
    MissingSecretHash,

    #[error("redeeming requires the secret")]
    MissingSecret,

    #[error("operation not allowed while settlement is {0:?}")]
    WrongState(SettlementState),

    #[error("transaction state regression: {0}")]
    Regression(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Numeric(#[from] NumericError),
}

impl SettlementError {
    /// Failures that may succeed when the same report is applied again
    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementError::Persistence(_) => true,
            SettlementError::Ledger(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Top-level error returned by the venue's transport-facing operations.
#[derive(Error, Debug)]
pub enum VenueError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("matching error: {0}")]
    Matching(#[from] MatchingError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("order book {0} is not running")]
    BookUnavailable(String),
}
