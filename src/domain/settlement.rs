// ============================================================================
// Settlement Domain Model
// The two-channel atomic swap that clears one trade
// ============================================================================

use super::{Channel, ChannelType, Exchange, Order, Trade, TradeState, TxState, TxType};
use crate::errors::SettlementError;
use crate::numeric::{commission, notional};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettlementId(Uuid);

impl SettlementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SettlementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Settlement State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementState {
    New,
    InitiateSetupAwaiting,
    InitiateSetupDone,
    InitiateSetupTimeout,
    ParticipateSetupAwaiting,
    ParticipateSetupDone,
    ParticipateSetupTimeout,
    InitiateRedeemAwaiting,
    InitiateRedeemDone,
    InitiateRefundAwaiting,
    InitiateRefundSuccess,
    InitiateRefundError,
    ParticipateRedeemAwaiting,
    ParticipateRedeemDone,
    ParticipateRefundAwaiting,
    ParticipateRefundSuccess,
    ParticipateRefundError,
}

impl SettlementState {
    /// No further transition is possible.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SettlementState::ParticipateRedeemDone
                | SettlementState::InitiateRefundError
                | SettlementState::ParticipateRefundSuccess
                | SettlementState::ParticipateRefundError
        )
    }

    /// A setup deadline elapsed; only the manual refund path may continue.
    pub fn is_halted(&self) -> bool {
        matches!(
            self,
            SettlementState::InitiateSetupTimeout | SettlementState::ParticipateSetupTimeout
        )
    }

    /// The trade state implied by this settlement state, once decided.
    pub fn trade_outcome(&self) -> Option<TradeState> {
        match self {
            SettlementState::ParticipateRedeemDone => Some(TradeState::Settled),
            SettlementState::InitiateSetupTimeout
            | SettlementState::ParticipateSetupTimeout
            | SettlementState::InitiateRefundSuccess
            | SettlementState::InitiateRefundError
            | SettlementState::ParticipateRefundSuccess
            | SettlementState::ParticipateRefundError => Some(TradeState::SettlementError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: SettlementState,
    pub at: DateTime<Utc>,
}

/// Mutable part of a settlement document, written by `update_settlement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPatch {
    pub state: SettlementState,
    pub history: Vec<StateRecord>,
    pub initiate_channel: Channel,
    pub participate_channel: Channel,
    pub updated_at: DateTime<Utc>,
}

/// A broadcast transaction still waiting for confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingTx {
    pub settlement_id: SettlementId,
    pub asset: String,
    pub channel_type: ChannelType,
    pub tx_type: TxType,
    pub hash: String,
}

// ============================================================================
// Settlement
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub trade_id: Uuid,
    pub exchange_id: String,
    pub pair: String,
    /// Seller; funds the initiate channel with the base asset
    pub initiator_id: String,
    /// Buyer; funds the participate channel with the quote asset
    pub participant_id: String,
    pub initiate_channel: Channel,
    pub participate_channel: Channel,
    state: SettlementState,
    history: Vec<StateRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    /// Lay out both swap legs for a trade.
    ///
    /// The seller locks `quantity` of the base asset in the initiate channel,
    /// the buyer locks the notional in the quote asset in the participate
    /// channel. Commission is charged per channel on its own asset.
    pub fn for_trade(
        trade: &Trade,
        exchange: &Exchange,
        seller: &Order,
        buyer: &Order,
    ) -> Result<Self, SettlementError> {
        let pair = exchange
            .pair(&trade.pair)
            .ok_or_else(|| SettlementError::UnknownPair(trade.pair.clone()))?;

        let base_amount = trade.quantity;
        let quote_amount = notional(trade.price, trade.quantity, pair.quote.decimals)?;

        let initiate_channel = Channel::new(
            ChannelType::Initiate,
            pair.base.symbol.clone(),
            seller.quote.send_address.clone(),
            buyer.quote.receive_address.clone(),
            base_amount,
            commission(base_amount, exchange.commission, pair.base.decimals)?,
            exchange.timeouts.initiate,
        );
        let participate_channel = Channel::new(
            ChannelType::Participate,
            pair.quote.symbol.clone(),
            buyer.quote.send_address.clone(),
            seller.quote.receive_address.clone(),
            quote_amount,
            commission(quote_amount, exchange.commission, pair.quote.decimals)?,
            exchange.timeouts.participate,
        );

        let now = Utc::now();
        Ok(Self {
            id: trade.settlement_id,
            trade_id: trade.id,
            exchange_id: trade.exchange_id.clone(),
            pair: trade.pair.clone(),
            initiator_id: seller.quote.customer_id.clone(),
            participant_id: buyer.quote.customer_id.clone(),
            initiate_channel,
            participate_channel,
            state: SettlementState::New,
            history: vec![StateRecord {
                state: SettlementState::New,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        })
    }

    pub fn state(&self) -> SettlementState {
        self.state
    }

    pub fn history(&self) -> &[StateRecord] {
        &self.history
    }

    pub fn channel(&self, channel_type: ChannelType) -> &Channel {
        match channel_type {
            ChannelType::Initiate => &self.initiate_channel,
            ChannelType::Participate => &self.participate_channel,
        }
    }

    pub fn channel_mut(&mut self, channel_type: ChannelType) -> &mut Channel {
        match channel_type {
            ChannelType::Initiate => &mut self.initiate_channel,
            ChannelType::Participate => &mut self.participate_channel,
        }
    }

    /// Both counter-parties, initiator first
    pub fn parties(&self) -> [&str; 2] {
        [&self.initiator_id, &self.participant_id]
    }

    /// Which channel and transaction own `hash`.
    pub fn locate(&self, hash: &str) -> Option<(ChannelType, TxType)> {
        [ChannelType::Initiate, ChannelType::Participate]
            .into_iter()
            .find_map(|ct| self.channel(ct).tx_type_of(hash).map(|tx| (ct, tx)))
    }

    /// Confirmation time of a channel's transaction, if confirmed.
    pub fn confirmed_at(&self, channel_type: ChannelType, tx_type: TxType) -> Option<DateTime<Utc>> {
        self.channel(channel_type).tx(tx_type).confirmed_at()
    }

    pub fn pending_transactions(&self) -> Vec<PendingTx> {
        [ChannelType::Initiate, ChannelType::Participate]
            .into_iter()
            .flat_map(|ct| {
                let channel = self.channel(ct);
                channel
                    .transactions()
                    .into_iter()
                    .filter(|tx| tx.is_pending())
                    .filter_map(move |tx| {
                        tx.hash.clone().map(|hash| PendingTx {
                            settlement_id: self.id,
                            asset: channel.asset.clone(),
                            channel_type: ct,
                            tx_type: tx.tx_type,
                            hash,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn has_pending_tx(&self) -> bool {
        !self.pending_transactions().is_empty()
    }

    /// Append a state to the history. Recording the current state again is
    /// a no-op.
    pub fn record_state(&mut self, state: SettlementState, at: DateTime<Utc>) -> bool {
        if state == self.state {
            return false;
        }
        self.state = state;
        self.history.push(StateRecord { state, at });
        self.updated_at = at;
        true
    }

    /// Append a passed-through milestone without making it current.
    pub fn record_milestone(&mut self, state: SettlementState, at: DateTime<Utc>) {
        self.history.push(StateRecord { state, at });
    }

    pub fn patch(&self) -> SettlementPatch {
        SettlementPatch {
            state: self.state,
            history: self.history.clone(),
            initiate_channel: self.initiate_channel.clone(),
            participate_channel: self.participate_channel.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn apply_patch(&mut self, patch: SettlementPatch) {
        self.state = patch.state;
        self.history = patch.history;
        self.initiate_channel = patch.initiate_channel;
        self.participate_channel = patch.participate_channel;
        self.updated_at = patch.updated_at;
    }

    /// Every broadcast transaction hash, with its owning channel.
    pub fn tx_hashes(&self) -> Vec<(ChannelType, TxType, &str)> {
        [ChannelType::Initiate, ChannelType::Participate]
            .into_iter()
            .flat_map(move |ct| {
                self.channel(ct)
                    .transactions()
                    .into_iter()
                    .filter_map(move |tx| tx.hash.as_deref().map(|hash| (ct, tx.tx_type, hash)))
            })
            .collect()
    }

    /// Current ledger state of one channel transaction.
    pub fn tx_state(&self, channel_type: ChannelType, tx_type: TxType) -> TxState {
        self.channel(channel_type).tx(tx_type).state()
    }
}
