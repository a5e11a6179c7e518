// ============================================================================
// DLT Listener
// Polls one ledger for the hashes of one (asset, channel, tx type) slot
// ============================================================================

use crate::domain::{ChannelType, EngineConfig, TxState, TxType};
use crate::interfaces::{LedgerService, TxReport};
use crossbeam_skiplist::SkipMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey {
    pub asset: String,
    pub channel_type: ChannelType,
    pub tx_type: TxType,
}

impl ListenerKey {
    pub fn new(asset: impl Into<String>, channel_type: ChannelType, tx_type: TxType) -> Self {
        Self {
            asset: asset.into(),
            channel_type,
            tx_type,
        }
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}/{:?}", self.asset, self.channel_type, self.tx_type)
    }
}

/// A ledger observation for one tracked hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEvent {
    pub key: ListenerKey,
    pub hash: String,
    pub report: TxReport,
}

/// Retry bookkeeping for one tracked hash
#[derive(Debug, Clone, Copy)]
struct TrackState {
    last_reported: Option<TxState>,
    failures: u32,
    next_attempt: Instant,
}

impl TrackState {
    fn due_now() -> Self {
        Self {
            last_reported: None,
            failures: 0,
            next_attempt: Instant::now(),
        }
    }
}

/// Tracks broadcast hashes and forwards ledger progress to the dispatcher.
///
/// CONFIRMED and failed hashes stop being tracked after they are forwarded;
/// a hook that could not apply one re-arms it with `retry_tx`. Ledger
/// outages reschedule a hash with exponential backoff and never produce an
/// event.
pub struct DltListener {
    key: ListenerKey,
    ledger: Arc<dyn LedgerService>,
    tracked: SkipMap<String, TrackState>,
    sender: mpsc::UnboundedSender<TxEvent>,
    poll_interval: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl DltListener {
    pub fn new(
        key: ListenerKey,
        ledger: Arc<dyn LedgerService>,
        sender: mpsc::UnboundedSender<TxEvent>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            key,
            ledger,
            tracked: SkipMap::new(),
            sender,
            poll_interval: config.poll_interval(),
            backoff_initial: config.retry_backoff_initial(),
            backoff_max: config.retry_backoff_max(),
        }
    }

    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    /// Begin tracking `hash`. Returns false when it is already tracked.
    pub fn add_tx(&self, hash: &str) -> bool {
        if self.tracked.contains_key(hash) {
            return false;
        }
        self.tracked.get_or_insert(hash.to_string(), TrackState::due_now());
        debug!(listener = %self.key, hash, "tracking transaction");
        true
    }

    /// Track `hash` again after its hook failed, so the next poll past one
    /// backoff step forwards its current state even if unchanged. Returns
    /// false when it was still tracked.
    pub fn retry_tx(&self, hash: &str) -> bool {
        let was_tracked = self.tracked.contains_key(hash);
        let state = TrackState {
            last_reported: None,
            failures: 1,
            next_attempt: Instant::now() + self.backoff(1),
        };
        self.tracked.insert(hash.to_string(), state);
        debug!(listener = %self.key, hash, "retrying transaction");
        !was_tracked
    }

    pub fn is_tracking(&self, hash: &str) -> bool {
        self.tracked.contains_key(hash)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Poll the hashes whose retry time has come. Returns the number of
    /// events forwarded.
    pub async fn poll_once(&self) -> usize {
        self.poll(false).await
    }

    /// Re-poll every tracked hash, ignoring backoff. Used once after start
    /// to catch transactions mined while the process was down.
    pub async fn recheck_if_mined(&self) -> usize {
        self.poll(true).await
    }

    /// Poll every `poll_interval` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(listener = %self.key, "listener stopped");
    }

    async fn poll(&self, force: bool) -> usize {
        let now = Instant::now();
        let due: Vec<(String, TrackState)> = self
            .tracked
            .iter()
            .filter(|entry| force || entry.value().next_attempt <= now)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        let mut forwarded = 0;
        for (hash, mut state) in due {
            match self.ledger.tx_status(&hash).await {
                Ok(TxReport::Progress(tx_state)) => {
                    if state.last_reported != Some(tx_state) {
                        forwarded += self.forward(&hash, TxReport::Progress(tx_state));
                    }
                    if tx_state == TxState::Confirmed {
                        self.tracked.remove(&hash);
                        continue;
                    }
                    state.last_reported = Some(tx_state);
                    state.failures = 0;
                    state.next_attempt = now;
                },
                Ok(TxReport::Failed(reason)) => {
                    forwarded += self.forward(&hash, TxReport::Failed(reason));
                    self.tracked.remove(&hash);
                    continue;
                },
                Err(err) if err.is_retryable() => {
                    state.failures = state.failures.saturating_add(1);
                    let backoff = self.backoff(state.failures);
                    state.next_attempt = now + backoff;
                    warn!(
                        listener = %self.key,
                        hash = %hash,
                        attempt = state.failures,
                        retry_in_ms = backoff.as_millis() as u64,
                        error = %err,
                        "ledger status lookup failed"
                    );
                },
                Err(err) => {
                    forwarded += self.forward(&hash, TxReport::Failed(err.to_string()));
                    self.tracked.remove(&hash);
                    continue;
                },
            }
            // skip if removed concurrently
            if self.tracked.contains_key(&hash) {
                self.tracked.insert(hash, state);
            }
        }
        forwarded
    }

    /// initial * 2^(failures - 1), capped at the configured maximum
    fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.backoff_initial
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }

    fn forward(&self, hash: &str, report: TxReport) -> usize {
        debug!(listener = %self.key, hash, ?report, "transaction progress");
        let event = TxEvent {
            key: self.key.clone(),
            hash: hash.to_string(),
            report,
        };
        match self.sender.send(event) {
            Ok(()) => 1,
            Err(_) => {
                warn!(listener = %self.key, hash, "dispatcher closed, dropping event");
                0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::InMemoryLedger;

    fn listener(
        ledger: Arc<InMemoryLedger>,
    ) -> (DltListener, mpsc::UnboundedReceiver<TxEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = EngineConfig::fast()
            .with_retry_backoff(Duration::from_millis(100), Duration::from_millis(400));
        let listener = DltListener::new(
            ListenerKey::new("ETH", ChannelType::Initiate, TxType::Contract),
            ledger,
            tx,
            &config,
        );
        (listener, rx)
    }

    #[tokio::test]
    async fn test_forwards_changes_once_and_stops_on_confirmation() {
        let ledger = Arc::new(InMemoryLedger::new("ETH"));
        ledger.set_state("0x1", TxState::Pending);
        let (listener, mut rx) = listener(Arc::clone(&ledger));

        assert!(listener.add_tx("0x1"));
        assert!(!listener.add_tx("0x1"));

        assert_eq!(listener.poll_once().await, 1);
        // unchanged state is not forwarded again
        assert_eq!(listener.poll_once().await, 0);

        ledger.confirm("0x1");
        assert_eq!(listener.poll_once().await, 1);
        assert!(!listener.is_tracking("0x1"));

        let reports: Vec<TxReport> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.report)
            .collect();
        assert_eq!(
            reports,
            vec![
                TxReport::Progress(TxState::Pending),
                TxReport::Progress(TxState::Confirmed)
            ]
        );
    }

    #[tokio::test]
    async fn test_outage_backs_off_without_events() {
        let ledger = Arc::new(InMemoryLedger::new("ETH"));
        ledger.set_state("0x1", TxState::Mined);
        ledger.set_unavailable(true);
        let (listener, mut rx) = listener(Arc::clone(&ledger));
        listener.add_tx("0x1");

        assert_eq!(listener.poll_once().await, 0);
        ledger.set_unavailable(false);
        // still backing off
        assert_eq!(listener.poll_once().await, 0);
        assert!(rx.try_recv().is_err());

        // recheck ignores the backoff schedule
        assert_eq!(listener.recheck_if_mined().await, 1);
        assert_eq!(
            rx.try_recv().unwrap().report,
            TxReport::Progress(TxState::Mined)
        );
    }

    #[tokio::test]
    async fn test_failed_transaction_forwarded_and_dropped() {
        let ledger = Arc::new(InMemoryLedger::new("ETH"));
        ledger.fail("0x1", "double spend");
        let (listener, mut rx) = listener(Arc::clone(&ledger));
        listener.add_tx("0x1");

        assert_eq!(listener.poll_once().await, 1);
        assert_eq!(listener.tracked_count(), 0);
        assert_eq!(
            rx.try_recv().unwrap().report,
            TxReport::Failed("double spend".to_string())
        );
    }

    #[tokio::test]
    async fn test_retry_reforwards_confirmation_after_backoff() {
        let ledger = Arc::new(InMemoryLedger::new("ETH"));
        ledger.confirm("0x1");
        let (listener, mut rx) = listener(Arc::clone(&ledger));
        listener.add_tx("0x1");

        assert_eq!(listener.poll_once().await, 1);
        assert!(!listener.is_tracking("0x1"));

        assert!(listener.retry_tx("0x1"));
        assert!(listener.is_tracking("0x1"));
        // not due before one backoff step
        assert_eq!(listener.poll_once().await, 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(listener.poll_once().await, 1);
        assert!(!listener.is_tracking("0x1"));

        let reports: Vec<TxReport> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.report)
            .collect();
        assert_eq!(
            reports,
            vec![
                TxReport::Progress(TxState::Confirmed),
                TxReport::Progress(TxState::Confirmed)
            ]
        );
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let ledger = Arc::new(InMemoryLedger::new("ETH"));
        let (listener, _rx) = listener(ledger);
        assert_eq!(listener.backoff(1), Duration::from_millis(100));
        assert_eq!(listener.backoff(2), Duration::from_millis(200));
        assert_eq!(listener.backoff(3), Duration::from_millis(400));
        assert_eq!(listener.backoff(10), Duration::from_millis(400));
    }
}
