// ============================================================================
// Settlement Coordinator
// Drives each trade's atomic swap from ledger reports and manual actions
// ============================================================================

use super::state_machine::{apply_event, deadline, reconcile, SettlementEvent};
use crate::dlt::ListenerRegistry;
use crate::domain::{
    ChannelType, Exchange, Order, PendingTx, Settlement, SettlementId, SettlementState, Side,
    Trade, TxType,
};
use crate::errors::{LedgerError, SettlementError};
use crate::interfaces::{EngineEvent, EventHandler, LedgerRegistry, Persistence, TxReport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use SettlementState::*;

/// Owns every settlement transition.
///
/// Work on different settlements runs in parallel; work on one settlement
/// is serialized by a per-id async lock held across the read, the ledger
/// call and the write.
pub struct SettlementCoordinator {
    persistence: Arc<dyn Persistence>,
    ledgers: LedgerRegistry,
    listeners: Arc<ListenerRegistry>,
    events: Arc<dyn EventHandler>,
    exchanges: HashMap<String, Exchange>,
    locks: Mutex<HashMap<SettlementId, Arc<AsyncMutex<()>>>>,
}

impl SettlementCoordinator {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        ledgers: LedgerRegistry,
        listeners: Arc<ListenerRegistry>,
        events: Arc<dyn EventHandler>,
        exchanges: impl IntoIterator<Item = Exchange>,
    ) -> Self {
        Self {
            persistence,
            ledgers,
            listeners,
            events,
            exchanges: exchanges
                .into_iter()
                .map(|exchange| (exchange.id.clone(), exchange))
                .collect(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub async fn get_settlement(&self, id: SettlementId) -> Result<Settlement, SettlementError> {
        self.persistence
            .get_settlement(id)
            .await?
            .ok_or(SettlementError::NotFound(id))
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Lay out and persist the settlement of a fresh trade. The seller
    /// initiates.
    pub async fn create_settlement(
        &self,
        trade: &Trade,
        exchange: &Exchange,
        make_order: &Order,
        take_order: &Order,
    ) -> Result<Settlement, SettlementError> {
        let (seller, buyer) = match make_order.side() {
            Side::Sell => (make_order, take_order),
            Side::Buy => (take_order, make_order),
        };
        let settlement = Settlement::for_trade(trade, exchange, seller, buyer)?;
        self.persistence.insert_settlement(&settlement).await?;

        info!(
            settlement = %settlement.id,
            trade = %trade.id,
            initiator = %settlement.initiator_id,
            participant = %settlement.participant_id,
            "settlement created"
        );
        self.publish(&settlement, &[New]);
        Ok(settlement)
    }

    // ========================================================================
    // Manual protocol steps
    // ========================================================================

    /// Deploy a channel's contract.
    ///
    /// The initiate leg needs the initiator's secret hash. The participate
    /// leg audits the confirmed initiate contract and reuses its hash.
    pub async fn settle(
        &self,
        id: SettlementId,
        channel_type: ChannelType,
        secret_hash: Option<String>,
    ) -> Result<Settlement, SettlementError> {
        let _guard = self.lock(id).lock_owned().await;
        let mut settlement = self.get_settlement(id).await?;
        ensure_unbroadcast(&settlement, channel_type, TxType::Contract)?;

        let hash = match channel_type {
            ChannelType::Initiate => {
                ensure_state(&settlement, &[New])?;
                let secret_hash = secret_hash.ok_or(SettlementError::MissingSecretHash)?;
                let channel = &settlement.initiate_channel;
                let hash = self
                    .ledgers
                    .get(&channel.asset)?
                    .initiate(channel, &secret_hash)
                    .await?;
                settlement.initiate_channel.secret_hash = Some(secret_hash);
                hash
            },
            ChannelType::Participate => {
                ensure_state(&settlement, &[ParticipateSetupAwaiting])?;
                let initiate = &settlement.initiate_channel;
                let audit = self
                    .ledgers
                    .get(&initiate.asset)?
                    .audit_contract(initiate)
                    .await?;
                if audit.amount != initiate.amount || audit.recipient != initiate.to_address {
                    return Err(LedgerError::Rejected(format!(
                        "initiate contract terms differ from settlement {id}"
                    ))
                    .into());
                }

                let channel = &settlement.participate_channel;
                let hash = self
                    .ledgers
                    .get(&channel.asset)?
                    .participate(channel, &audit.secret_hash)
                    .await?;
                settlement
                    .initiate_channel
                    .secret_hash
                    .get_or_insert_with(|| audit.secret_hash.clone());
                settlement.participate_channel.secret_hash = Some(audit.secret_hash);
                hash
            },
        };

        self.bind_and_commit(settlement, channel_type, TxType::Contract, hash)
            .await
    }

    /// Broadcast a channel's redeem.
    ///
    /// The participate leg recovers the secret from the initiate redeem when
    /// none is supplied.
    pub async fn redeem(
        &self,
        id: SettlementId,
        channel_type: ChannelType,
        secret: Option<String>,
    ) -> Result<Settlement, SettlementError> {
        let _guard = self.lock(id).lock_owned().await;
        let settlement = self.get_settlement(id).await?;
        ensure_contract(&settlement, channel_type)?;
        ensure_unbroadcast(&settlement, channel_type, TxType::Redeem)?;

        let secret = match channel_type {
            ChannelType::Initiate => {
                ensure_state(&settlement, &[InitiateRedeemAwaiting])?;
                secret.ok_or(SettlementError::MissingSecret)?
            },
            ChannelType::Participate => {
                ensure_state(&settlement, &[InitiateRedeemDone])?;
                match secret {
                    Some(secret) => secret,
                    None => {
                        let initiate = &settlement.initiate_channel;
                        self.ledgers
                            .get(&initiate.asset)?
                            .extract_secret(initiate)
                            .await?
                    },
                }
            },
        };

        let channel = settlement.channel(channel_type);
        let hash = self
            .ledgers
            .get(&channel.asset)?
            .redeem(channel, &secret)
            .await?;
        self.bind_and_commit(settlement, channel_type, TxType::Redeem, hash)
            .await
    }

    /// Broadcast a channel's refund. This is the fallback path after a
    /// timeout or an abandoned swap.
    pub async fn refund(
        &self,
        id: SettlementId,
        channel_type: ChannelType,
    ) -> Result<Settlement, SettlementError> {
        let _guard = self.lock(id).lock_owned().await;
        let settlement = self.get_settlement(id).await?;
        ensure_contract(&settlement, channel_type)?;
        ensure_unbroadcast(&settlement, channel_type, TxType::Refund)?;

        match channel_type {
            ChannelType::Initiate => ensure_state(
                &settlement,
                &[
                    InitiateRedeemAwaiting,
                    InitiateSetupTimeout,
                    ParticipateSetupTimeout,
                    InitiateRefundAwaiting,
                ],
            )?,
            ChannelType::Participate => ensure_state(
                &settlement,
                &[
                    InitiateRedeemAwaiting,
                    ParticipateRedeemAwaiting,
                    InitiateRefundAwaiting,
                    InitiateRefundSuccess,
                    ParticipateRefundAwaiting,
                ],
            )?,
        }

        let channel = settlement.channel(channel_type);
        let hash = self.ledgers.get(&channel.asset)?.refund(channel).await?;
        self.bind_and_commit(settlement, channel_type, TxType::Refund, hash)
            .await
    }

    // ========================================================================
    // Ledger hooks
    // ========================================================================

    /// Apply a ledger report for `hash`. Safe to call any number of times
    /// with the same report.
    pub async fn apply_tx_report(
        &self,
        hash: &str,
        tx_type: TxType,
        report: TxReport,
    ) -> Result<Settlement, SettlementError> {
        let owner = self
            .persistence
            .get_settlement_by_tx_hash(hash)
            .await?
            .ok_or_else(|| SettlementError::UnknownTxHash(hash.to_string()))?;

        let _guard = self.lock(owner.id).lock_owned().await;
        let mut settlement = self.get_settlement(owner.id).await?;
        let (channel_type, located) = settlement
            .locate(hash)
            .ok_or_else(|| SettlementError::UnknownTxHash(hash.to_string()))?;
        if located != tx_type {
            warn!(
                settlement = %settlement.id,
                hash,
                reported = ?tx_type,
                recorded = ?located,
                "report routed to the wrong listener, using recorded type"
            );
        }

        let now = Utc::now();
        let tx = settlement.channel_mut(channel_type).tx_mut(located);
        let tx_changed = match report {
            TxReport::Progress(state) => tx
                .advance(state, now)
                .map_err(|regression| SettlementError::Regression(regression.to_string()))?,
            TxReport::Failed(reason) => {
                let changed = tx.mark_failed(reason.as_str());
                if changed {
                    warn!(settlement = %settlement.id, hash, %reason, "ledger rejected transaction");
                }
                changed
            },
        };

        let appended = reconcile(&mut settlement, now);
        if tx_changed || !appended.is_empty() {
            self.commit(&settlement, &appended).await?;
        } else {
            debug!(settlement = %settlement.id, hash, "replayed report ignored");
        }
        Ok(settlement)
    }

    // ========================================================================
    // Timeouts and recovery
    // ========================================================================

    /// Move every settlement whose deadline passed at `now` into its timeout
    /// or refund-awaiting state. Returns the settlements moved.
    pub async fn sweep_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SettlementId, SettlementState)>, SettlementError> {
        let mut moved = Vec::new();
        for candidate in self.persistence.get_active_settlements().await? {
            let Some(exchange) = self.exchanges.get(&candidate.exchange_id) else {
                warn!(settlement = %candidate.id, exchange = %candidate.exchange_id, "unknown exchange");
                continue;
            };
            if !deadline(&candidate, &exchange.timeouts).is_some_and(|(_, at)| at <= now) {
                continue;
            }

            match self.expire(candidate.id, &exchange.timeouts, now).await {
                Ok(Some(state)) => moved.push((candidate.id, state)),
                Ok(None) => {},
                Err(err) => error!(settlement = %candidate.id, error = %err, "timeout sweep failed"),
            }
        }
        Ok(moved)
    }

    /// Run `sweep_timeouts` every `interval` until shutdown
    pub async fn run_timeout_sweep(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_timeouts(Utc::now()).await {
                        error!(error = %err, "timeout sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Re-derive every active settlement from its recorded facts and track
    /// every broadcast, unconfirmed transaction again. Idempotent.
    /// Returns the number of hashes newly tracked.
    pub async fn recover(&self) -> Result<usize, SettlementError> {
        for candidate in self.persistence.get_active_settlements().await? {
            let _guard = self.lock(candidate.id).lock_owned().await;
            let mut settlement = self.get_settlement(candidate.id).await?;
            let appended = reconcile(&mut settlement, Utc::now());
            if !appended.is_empty() {
                info!(settlement = %settlement.id, state = ?settlement.state(), "settlement re-derived");
                self.commit(&settlement, &appended).await?;
            }
        }

        let mut tracked = 0;
        for settlement in self.persistence.get_settlements_with_pending_tx().await? {
            for pending in settlement.pending_transactions() {
                if self.listeners.track(&pending)? {
                    tracked += 1;
                }
            }
        }
        info!(tracked, "pending settlement transactions registered");
        Ok(tracked)
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn lock(&self, id: SettlementId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(id).or_default())
    }

    /// Drop a final settlement's lock unless another task is waiting on it.
    /// Called with the caller's guard held: map plus guard is two owners.
    fn release(&self, id: SettlementId) {
        let mut locks = self.locks.lock();
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) <= 2) {
            locks.remove(&id);
            debug!(settlement = %id, "settlement lock released");
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    async fn expire(
        &self,
        id: SettlementId,
        timeouts: &crate::domain::HtlcTimeouts,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementState>, SettlementError> {
        let _guard = self.lock(id).lock_owned().await;
        let mut settlement = self.get_settlement(id).await?;

        // the settlement may have progressed since the sweep read it
        let Some((channel_type, at)) = deadline(&settlement, timeouts) else {
            return Ok(None);
        };
        if at > now {
            return Ok(None);
        }

        let appended = apply_event(&mut settlement, SettlementEvent::DeadlineElapsed(channel_type), now);
        if appended.is_empty() {
            debug!(settlement = %id, state = ?settlement.state(), "deadline not applicable");
            return Ok(None);
        }
        warn!(settlement = %id, state = ?settlement.state(), "settlement deadline elapsed");
        self.commit(&settlement, &appended).await?;
        Ok(Some(settlement.state()))
    }

    /// Record a broadcast hash, re-derive, persist and start tracking it.
    async fn bind_and_commit(
        &self,
        mut settlement: Settlement,
        channel_type: ChannelType,
        tx_type: TxType,
        hash: String,
    ) -> Result<Settlement, SettlementError> {
        if let Some(owner) = self.persistence.get_settlement_by_tx_hash(&hash).await? {
            if owner.id != settlement.id {
                error!(settlement = %settlement.id, %hash, owner = %owner.id, "ledger returned a known hash");
                return Err(SettlementError::DuplicateTxHash {
                    hash,
                    owner: owner.id,
                });
            }
        }
        if settlement
            .locate(&hash)
            .is_some_and(|slot| slot != (channel_type, tx_type))
        {
            return Err(SettlementError::DuplicateTxHash {
                hash,
                owner: settlement.id,
            });
        }

        let now = Utc::now();
        settlement
            .channel_mut(channel_type)
            .tx_mut(tx_type)
            .broadcast(hash.clone(), now);
        let appended = reconcile(&mut settlement, now);
        self.commit(&settlement, &appended).await?;

        let pending = PendingTx {
            settlement_id: settlement.id,
            asset: settlement.channel(channel_type).asset.clone(),
            channel_type,
            tx_type,
            hash,
        };
        self.listeners.track(&pending)?;
        info!(
            settlement = %settlement.id,
            channel = ?channel_type,
            tx = ?tx_type,
            hash = %pending.hash,
            "transaction broadcast"
        );
        Ok(settlement)
    }

    /// Persist, publish the appended states and conclude the trade once the
    /// settlement decided it.
    async fn commit(
        &self,
        settlement: &Settlement,
        appended: &[SettlementState],
    ) -> Result<(), SettlementError> {
        self.persistence
            .update_settlement(settlement.id, &settlement.patch())
            .await?;
        self.publish(settlement, appended);

        let Some(outcome) = settlement.state().trade_outcome() else {
            return Ok(());
        };
        if let Some(mut trade) = self.persistence.get_trade(settlement.trade_id).await? {
            if trade.conclude(outcome) {
                self.persistence.upsert_trade(&trade).await?;
                info!(trade = %trade.id, state = ?trade.state, "trade concluded");
            }
        }
        if settlement.state().is_final() {
            self.release(settlement.id);
        }
        Ok(())
    }

    fn publish(&self, settlement: &Settlement, appended: &[SettlementState]) {
        if appended.is_empty() {
            return;
        }
        let now = Utc::now();
        let customer_ids = [
            settlement.initiator_id.clone(),
            settlement.participant_id.clone(),
        ];

        let mut events = Vec::with_capacity(appended.len() + 1);
        for &state in appended {
            debug!(settlement = %settlement.id, ?state, "settlement state changed");
            events.push(EngineEvent::SettlementStateChanged {
                settlement_id: settlement.id,
                customer_ids: customer_ids.clone(),
                state,
                timestamp: now,
            });
            if state == ParticipateSetupAwaiting {
                events.push(EngineEvent::SettlementParticipate {
                    settlement_id: settlement.id,
                    customer_id: settlement.participant_id.clone(),
                    settlement: Box::new(settlement.clone()),
                    timestamp: now,
                });
            }
        }
        self.events.on_events(events);
    }
}

fn ensure_state(settlement: &Settlement, allowed: &[SettlementState]) -> Result<(), SettlementError> {
    if allowed.contains(&settlement.state()) {
        Ok(())
    } else {
        Err(SettlementError::WrongState(settlement.state()))
    }
}

fn ensure_contract(settlement: &Settlement, channel_type: ChannelType) -> Result<(), SettlementError> {
    if settlement.channel(channel_type).tx_contract.hash.is_none() {
        return Err(SettlementError::ChannelNotReady {
            channel: channel_type,
            tx_type: TxType::Contract,
        });
    }
    Ok(())
}

fn ensure_unbroadcast(
    settlement: &Settlement,
    channel_type: ChannelType,
    tx_type: TxType,
) -> Result<(), SettlementError> {
    if settlement.channel(channel_type).tx(tx_type).hash.is_some() {
        return Err(SettlementError::WrongState(settlement.state()));
    }
    Ok(())
}
