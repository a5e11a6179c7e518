// ============================================================================
// Ledger Transaction Domain Model
// One of the three transactions (contract, redeem, refund) of a channel
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Contract,
    Redeem,
    Refund,
}

/// Ledger progress of a transaction. Declaration order is the protocol
/// order, so comparisons detect regressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    New,
    Script,
    Signed,
    Pending,
    Mined,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStateRecord {
    pub state: TxState,
    pub at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{tx_type:?} transaction {hash:?} cannot move from {current:?} back to {attempted:?}")]
pub struct TxRegression {
    pub tx_type: TxType,
    pub hash: Option<String>,
    pub current: TxState,
    pub attempted: TxState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub asset: String,
    pub tx_type: TxType,
    /// Set once broadcast; the join key for ledger events
    pub hash: Option<String>,
    state: TxState,
    history: Vec<TxStateRecord>,
    /// Reason reported by the ledger when it rejected the transaction
    pub failed: Option<String>,
}

impl Transaction {
    pub fn new(asset: impl Into<String>, tx_type: TxType) -> Self {
        Self {
            asset: asset.into(),
            tx_type,
            hash: None,
            state: TxState::New,
            history: vec![TxStateRecord {
                state: TxState::New,
                at: Utc::now(),
            }],
            failed: None,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn history(&self) -> &[TxStateRecord] {
        &self.history
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TxState::Confirmed
    }

    /// Broadcast but neither confirmed nor failed.
    pub fn is_pending(&self) -> bool {
        self.hash.is_some() && self.state < TxState::Confirmed && self.failed.is_none()
    }

    /// When the transaction reached CONFIRMED, if it did.
    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .find(|record| record.state == TxState::Confirmed)
            .map(|record| record.at)
    }

    /// Move forward to `next`.
    ///
    /// Returns `Ok(false)` when the transaction already is in `next`
    /// (replayed event) and an error when `next` lies behind the current state.
    pub fn advance(&mut self, next: TxState, at: DateTime<Utc>) -> Result<bool, TxRegression> {
        if next < self.state {
            return Err(TxRegression {
                tx_type: self.tx_type,
                hash: self.hash.clone(),
                current: self.state,
                attempted: next,
            });
        }
        if next == self.state {
            return Ok(false);
        }
        self.state = next;
        self.history.push(TxStateRecord { state: next, at });
        Ok(true)
    }

    /// Record the hash returned by the ledger service for a broadcast.
    pub fn broadcast(&mut self, hash: impl Into<String>, at: DateTime<Utc>) {
        self.hash = Some(hash.into());
        // a fresh transaction cannot regress, so the result is always Ok
        let _ = self.advance(TxState::Pending.max(self.state), at);
    }

    /// Returns false when the failure was already known or the transaction
    /// confirmed in the meantime.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.failed.is_some() || self.is_confirmed() {
            return false;
        }
        self.failed = Some(reason.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{quickcheck, Arbitrary, Gen};

    #[derive(Debug, Clone, Copy)]
    struct ArbState(TxState);

    impl Arbitrary for ArbState {
        fn arbitrary(g: &mut Gen) -> Self {
            let states = [
                TxState::New,
                TxState::Script,
                TxState::Signed,
                TxState::Pending,
                TxState::Mined,
                TxState::Confirmed,
            ];
            ArbState(*g.choose(&states).unwrap_or(&TxState::New))
        }
    }

    #[test]
    fn test_forward_progress() {
        let mut tx = Transaction::new("BTC", TxType::Contract);
        tx.broadcast("h1", Utc::now());
        assert_eq!(tx.state(), TxState::Pending);
        assert!(tx.is_pending());

        assert_eq!(tx.advance(TxState::Confirmed, Utc::now()), Ok(true));
        assert!(tx.confirmed_at().is_some());
        assert!(!tx.is_pending());
    }

    #[test]
    fn test_regression_rejected() {
        let mut tx = Transaction::new("BTC", TxType::Redeem);
        tx.advance(TxState::Mined, Utc::now()).unwrap();

        let err = tx.advance(TxState::Signed, Utc::now()).unwrap_err();
        assert_eq!(err.current, TxState::Mined);
        assert_eq!(tx.state(), TxState::Mined);
    }

    #[test]
    fn test_replay_is_noop() {
        let mut tx = Transaction::new("ETH", TxType::Contract);
        tx.advance(TxState::Confirmed, Utc::now()).unwrap();
        let history_len = tx.history().len();

        assert_eq!(tx.advance(TxState::Confirmed, Utc::now()), Ok(false));
        assert_eq!(tx.history().len(), history_len);
    }

    #[test]
    fn test_failure_recorded_once() {
        let mut tx = Transaction::new("ETH", TxType::Refund);
        tx.broadcast("h9", Utc::now());
        assert!(tx.mark_failed("double spend"));
        assert!(!tx.mark_failed("double spend"));
        assert!(!tx.is_pending());
    }

    #[test]
    fn prop_observed_states_are_monotonic() {
        fn prop(reports: Vec<ArbState>) -> bool {
            let mut tx = Transaction::new("BTC", TxType::Contract);
            for ArbState(state) in reports {
                let _ = tx.advance(state, Utc::now());
            }
            tx.history()
                .windows(2)
                .all(|pair| pair[0].state < pair[1].state)
        }
        quickcheck(prop as fn(Vec<ArbState>) -> bool);
    }
}
