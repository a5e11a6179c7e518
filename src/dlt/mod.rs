//! Ledger observation: listeners poll broadcast hashes, the dispatcher hands
//! their reports to the settlement coordinator.

mod dispatcher;
mod listener;
mod registry;

pub use dispatcher::{Hook, HookDispatcher};
pub use listener::{DltListener, ListenerKey, TxEvent};
pub use registry::ListenerRegistry;
