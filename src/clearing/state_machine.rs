// ============================================================================
// Settlement State Machine
// Pure transition table, fact derivation and deadline computation
// ============================================================================

use crate::domain::{ChannelType, HtlcTimeouts, Settlement, SettlementState, TxType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol events that can move a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementEvent {
    SetupBroadcast(ChannelType),
    ContractConfirmed(ChannelType),
    RedeemBroadcast(ChannelType),
    RedeemConfirmed(ChannelType),
    RefundBroadcast(ChannelType),
    RefundConfirmed(ChannelType),
    RefundFailed(ChannelType),
    DeadlineElapsed(ChannelType),
}

/// The state `event` moves `current` to, or `None` when the event does not
/// apply in `current`.
pub fn next_state(current: SettlementState, event: SettlementEvent) -> Option<SettlementState> {
    use ChannelType::{Initiate, Participate};
    use SettlementEvent::*;
    use SettlementState::*;

    let next = match (current, event) {
        (New, SetupBroadcast(Initiate)) => InitiateSetupAwaiting,
        (New | InitiateSetupAwaiting, ContractConfirmed(Initiate)) => ParticipateSetupAwaiting,
        (New | InitiateSetupAwaiting, DeadlineElapsed(Initiate)) => InitiateSetupTimeout,

        (ParticipateSetupAwaiting, ContractConfirmed(Participate)) => InitiateRedeemAwaiting,
        (ParticipateSetupAwaiting, DeadlineElapsed(Participate)) => ParticipateSetupTimeout,

        (InitiateRedeemAwaiting, RedeemBroadcast(Initiate)) => InitiateRedeemAwaiting,
        (InitiateRedeemAwaiting, RedeemConfirmed(Initiate)) => InitiateRedeemDone,
        (InitiateRedeemAwaiting, DeadlineElapsed(Initiate)) => InitiateRefundAwaiting,

        (
            InitiateRedeemAwaiting | InitiateSetupTimeout | ParticipateSetupTimeout,
            RefundBroadcast(Initiate),
        ) => InitiateRefundAwaiting,
        (InitiateRefundAwaiting, RefundConfirmed(Initiate)) => InitiateRefundSuccess,
        (InitiateRefundAwaiting, RefundFailed(Initiate)) => InitiateRefundError,

        (InitiateRedeemDone, RedeemBroadcast(Participate)) => ParticipateRedeemAwaiting,
        (InitiateRedeemDone | ParticipateRedeemAwaiting, RedeemConfirmed(Participate)) => {
            ParticipateRedeemDone
        },
        (ParticipateRedeemAwaiting, DeadlineElapsed(Participate)) => ParticipateRefundAwaiting,

        (
            InitiateRedeemAwaiting
            | ParticipateRedeemAwaiting
            | InitiateRefundAwaiting
            | InitiateRefundSuccess,
            RefundBroadcast(Participate),
        ) => ParticipateRefundAwaiting,
        (ParticipateRefundAwaiting, RefundConfirmed(Participate)) => ParticipateRefundSuccess,
        (ParticipateRefundAwaiting, RefundFailed(Participate)) => ParticipateRefundError,

        _ => return None,
    };
    Some(next)
}

/// Setup milestone passed through on the way to the next awaiting state
pub fn milestone(current: SettlementState, event: SettlementEvent) -> Option<SettlementState> {
    match (next_state(current, event)?, event) {
        (SettlementState::ParticipateSetupAwaiting, SettlementEvent::ContractConfirmed(_)) => {
            Some(SettlementState::InitiateSetupDone)
        },
        (SettlementState::InitiateRedeemAwaiting, SettlementEvent::ContractConfirmed(_)) => {
            Some(SettlementState::ParticipateSetupDone)
        },
        _ => None,
    }
}

/// Apply one event, recording any milestone first. Returns the history
/// entries appended, empty when the event did not apply.
pub fn apply_event(
    settlement: &mut Settlement,
    event: SettlementEvent,
    at: DateTime<Utc>,
) -> Vec<SettlementState> {
    let current = settlement.state();
    let Some(next) = next_state(current, event) else {
        return Vec::new();
    };
    if next == current {
        return Vec::new();
    }

    let mut appended = Vec::with_capacity(2);
    if let Some(passed) = milestone(current, event) {
        settlement.record_milestone(passed, at);
        appended.push(passed);
    }
    settlement.record_state(next, at);
    appended.push(next);
    appended
}

/// Events implied by the settlement's recorded transactions, in protocol
/// order.
pub fn facts(settlement: &Settlement) -> Vec<SettlementEvent> {
    use SettlementEvent::*;

    let mut facts = Vec::new();
    for channel_type in [ChannelType::Initiate, ChannelType::Participate] {
        let channel = settlement.channel(channel_type);
        let contract = channel.tx(TxType::Contract);
        if contract.hash.is_some() {
            facts.push(SetupBroadcast(channel_type));
        }
        if contract.is_confirmed() {
            facts.push(ContractConfirmed(channel_type));
        }
    }
    for channel_type in [ChannelType::Initiate, ChannelType::Participate] {
        let redeem = settlement.channel(channel_type).tx(TxType::Redeem);
        if redeem.hash.is_some() {
            facts.push(RedeemBroadcast(channel_type));
        }
        if redeem.is_confirmed() {
            facts.push(RedeemConfirmed(channel_type));
        }
    }
    for channel_type in [ChannelType::Initiate, ChannelType::Participate] {
        let refund = settlement.channel(channel_type).tx(TxType::Refund);
        if refund.hash.is_some() {
            facts.push(RefundBroadcast(channel_type));
        }
        if refund.is_confirmed() {
            facts.push(RefundConfirmed(channel_type));
        } else if refund.failed.is_some() {
            facts.push(RefundFailed(channel_type));
        }
    }
    facts
}

/// Re-derive the state from the recorded facts until nothing applies.
///
/// Restarts from the first fact after every transition so facts observed
/// out of order still apply in protocol order. The transition graph is
/// acyclic, so the loop terminates.
pub fn reconcile(settlement: &mut Settlement, at: DateTime<Utc>) -> Vec<SettlementState> {
    let mut appended = Vec::new();
    'derive: loop {
        for fact in facts(settlement) {
            let applied = apply_event(settlement, fact, at);
            if !applied.is_empty() {
                appended.extend(applied);
                continue 'derive;
            }
        }
        return appended;
    }
}

/// The pending deadline of a settlement and the channel it belongs to.
pub fn deadline(
    settlement: &Settlement,
    timeouts: &HtlcTimeouts,
) -> Option<(ChannelType, DateTime<Utc>)> {
    use SettlementState::*;

    let confirmed = |channel_type| settlement.confirmed_at(channel_type, TxType::Contract);
    match settlement.state() {
        New | InitiateSetupAwaiting => Some((
            ChannelType::Initiate,
            settlement.created_at + timeouts.participate_effective_duration(),
        )),
        ParticipateSetupAwaiting => confirmed(ChannelType::Initiate).map(|at| {
            (
                ChannelType::Participate,
                at + timeouts.participate_effective_duration(),
            )
        }),
        InitiateRedeemAwaiting => confirmed(ChannelType::Initiate)
            .map(|at| (ChannelType::Initiate, at + timeouts.initiate_duration())),
        ParticipateRedeemAwaiting => confirmed(ChannelType::Participate)
            .map(|at| (ChannelType::Participate, at + timeouts.participate_duration())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Asset, AssetPair, Exchange, MatchingAlgorithmType, Order, Quote, Side, Trade, TxState,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use ChannelType::{Initiate, Participate};
    use SettlementEvent::*;
    use SettlementState::*;

    fn settlement() -> Settlement {
        let exchange = Exchange::new("x1", "SWAP", "Swap Venue", MatchingAlgorithmType::Standard)
            .with_pair(AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)));
        let buy = Order::new(Quote::limit("x1", "ETHBTC", "alice", Side::Buy, dec!(0.05), dec!(1)));
        let sell = Order::new(Quote::limit("x1", "ETHBTC", "bob", Side::Sell, dec!(0.05), dec!(1)));
        let trade = Trade::new(&buy, &sell, dec!(0.05), dec!(1));
        Settlement::for_trade(&trade, &exchange, &sell, &buy).unwrap()
    }

    fn confirm(settlement: &mut Settlement, channel: ChannelType, tx_type: TxType, hash: &str) {
        let tx = settlement.channel_mut(channel).tx_mut(tx_type);
        tx.broadcast(hash, Utc::now());
        tx.advance(TxState::Confirmed, Utc::now()).unwrap();
    }

    #[test]
    fn test_happy_path_table() {
        let path = [
            (New, SetupBroadcast(Initiate), InitiateSetupAwaiting),
            (InitiateSetupAwaiting, ContractConfirmed(Initiate), ParticipateSetupAwaiting),
            (ParticipateSetupAwaiting, ContractConfirmed(Participate), InitiateRedeemAwaiting),
            (InitiateRedeemAwaiting, RedeemConfirmed(Initiate), InitiateRedeemDone),
            (InitiateRedeemDone, RedeemBroadcast(Participate), ParticipateRedeemAwaiting),
            (ParticipateRedeemAwaiting, RedeemConfirmed(Participate), ParticipateRedeemDone),
        ];
        for (current, event, expected) in path {
            assert_eq!(next_state(current, event), Some(expected), "{current:?} + {event:?}");
        }
    }

    #[test]
    fn test_refund_and_timeout_table() {
        assert_eq!(
            next_state(ParticipateSetupAwaiting, DeadlineElapsed(Participate)),
            Some(ParticipateSetupTimeout)
        );
        assert_eq!(
            next_state(ParticipateSetupTimeout, RefundBroadcast(Initiate)),
            Some(InitiateRefundAwaiting)
        );
        assert_eq!(
            next_state(InitiateRefundAwaiting, RefundFailed(Initiate)),
            Some(InitiateRefundError)
        );
        assert_eq!(
            next_state(InitiateRefundSuccess, RefundBroadcast(Participate)),
            Some(ParticipateRefundAwaiting)
        );
        assert_eq!(
            next_state(ParticipateRefundAwaiting, RefundConfirmed(Participate)),
            Some(ParticipateRefundSuccess)
        );
    }

    #[test]
    fn test_halted_and_final_states_ignore_progress() {
        assert_eq!(next_state(InitiateSetupTimeout, ContractConfirmed(Initiate)), None);
        assert_eq!(next_state(ParticipateRedeemDone, RedeemConfirmed(Participate)), None);
        // the participate contract cannot confirm before the initiate one
        assert_eq!(next_state(New, ContractConfirmed(Participate)), None);
    }

    #[test]
    fn test_milestones() {
        assert_eq!(
            milestone(InitiateSetupAwaiting, ContractConfirmed(Initiate)),
            Some(InitiateSetupDone)
        );
        assert_eq!(
            milestone(ParticipateSetupAwaiting, ContractConfirmed(Participate)),
            Some(ParticipateSetupDone)
        );
        assert_eq!(milestone(New, SetupBroadcast(Initiate)), None);
    }

    #[test]
    fn test_reconcile_out_of_order_confirmations() {
        let mut settlement = settlement();
        // participate contract reported before the initiate contract
        confirm(&mut settlement, Participate, TxType::Contract, "p1");
        assert!(reconcile(&mut settlement, Utc::now()).is_empty());

        confirm(&mut settlement, Initiate, TxType::Contract, "i1");
        let appended = reconcile(&mut settlement, Utc::now());
        assert_eq!(
            appended,
            vec![
                InitiateSetupAwaiting,
                InitiateSetupDone,
                ParticipateSetupAwaiting,
                ParticipateSetupDone,
                InitiateRedeemAwaiting,
            ]
        );
        assert_eq!(settlement.state(), InitiateRedeemAwaiting);

        // replay is a no-op
        assert!(reconcile(&mut settlement, Utc::now()).is_empty());
    }

    #[test]
    fn test_deadlines() {
        let mut settlement = settlement();
        let timeouts = HtlcTimeouts::new(7200, 3600, 1800);

        let (channel, at) = deadline(&settlement, &timeouts).unwrap();
        assert_eq!(channel, Initiate);
        assert_eq!(at, settlement.created_at + Duration::seconds(1800));

        confirm(&mut settlement, Initiate, TxType::Contract, "i1");
        reconcile(&mut settlement, Utc::now());
        let confirmed = settlement.confirmed_at(Initiate, TxType::Contract).unwrap();
        assert_eq!(
            deadline(&settlement, &timeouts),
            Some((Participate, confirmed + Duration::seconds(1800)))
        );

        confirm(&mut settlement, Participate, TxType::Contract, "p1");
        reconcile(&mut settlement, Utc::now());
        assert_eq!(
            deadline(&settlement, &timeouts),
            Some((Initiate, confirmed + Duration::seconds(7200)))
        );
    }

    #[test]
    fn test_apply_deadline_event() {
        let mut settlement = settlement();
        let appended = apply_event(&mut settlement, DeadlineElapsed(Initiate), Utc::now());
        assert_eq!(appended, vec![InitiateSetupTimeout]);
        assert!(settlement.state().is_halted());
    }
}
