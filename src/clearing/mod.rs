//! Atomic-swap settlement: the transition table and the coordinator that
//! drives it.

pub mod coordinator;
pub mod state_machine;

pub use coordinator::SettlementCoordinator;
pub use state_machine::{apply_event, deadline, next_state, reconcile, SettlementEvent};
