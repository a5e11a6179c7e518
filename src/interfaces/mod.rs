// ============================================================================
// Interfaces Module
// Contains all trait definitions and contracts
// ============================================================================

mod event_handler;
mod ledger;
mod matching_algorithm;
mod persistence;

pub use event_handler::{
    ChannelEventHandler, EngineEvent, EventHandler, EventKey, LoggingEventHandler,
    NoOpEventHandler,
};
pub use ledger::{ContractAudit, InMemoryLedger, LedgerRegistry, LedgerService, TxReport};
pub use matching_algorithm::{can_match_base, MatchOutcome, MatchingAlgorithm, Trades};
pub use persistence::{InMemoryPersistence, OrderFilter, Persistence};
