// ============================================================================
// Hook Dispatcher
// Routes listener events to settlement hooks without blocking the listeners
// ============================================================================

use super::listener::TxEvent;
use crate::clearing::SettlementCoordinator;
use crate::domain::TxType;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The callback an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Contract,
    Redeem,
    Refund,
}

impl Hook {
    pub fn route(tx_type: TxType) -> Self {
        match tx_type {
            TxType::Contract => Hook::Contract,
            TxType::Redeem => Hook::Redeem,
            TxType::Refund => Hook::Refund,
        }
    }

    fn tx_type(self) -> TxType {
        match self {
            Hook::Contract => TxType::Contract,
            Hook::Redeem => TxType::Redeem,
            Hook::Refund => TxType::Refund,
        }
    }
}

pub struct HookDispatcher {
    coordinator: Arc<SettlementCoordinator>,
    receiver: mpsc::UnboundedReceiver<TxEvent>,
}

impl HookDispatcher {
    pub fn new(
        coordinator: Arc<SettlementCoordinator>,
        receiver: mpsc::UnboundedReceiver<TxEvent>,
    ) -> Self {
        Self {
            coordinator,
            receiver,
        }
    }

    /// Drain events until shutdown or until every listener is gone. Each
    /// event runs on its own task; the coordinator serializes per settlement.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(event) => {
                        self.spawn(event);
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("hook dispatcher stopped");
    }

    /// Dispatch every event already queued and wait for the hooks to finish.
    /// Returns the number of events dispatched.
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut hooks = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            hooks.push(self.spawn(event));
        }
        let dispatched = hooks.len();
        for hook in hooks {
            if let Err(err) = hook.await {
                error!(error = %err, "settlement hook panicked");
            }
        }
        dispatched
    }

    fn spawn(&self, event: TxEvent) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            let hook = Hook::route(event.key.tx_type);
            debug!(?hook, listener = %event.key, hash = %event.hash, report = ?event.report, "hook invoked");

            match coordinator
                .apply_tx_report(&event.hash, hook.tx_type(), event.report)
                .await
            {
                Ok(settlement) => {
                    debug!(settlement = %settlement.id, state = ?settlement.state(), "hook applied");
                },
                Err(err) if err.is_retryable() => {
                    let rearmed = coordinator.listeners().retry(&event.key, &event.hash);
                    error!(
                        ?hook,
                        hash = %event.hash,
                        rearmed,
                        error = %err,
                        "settlement hook failed, transaction re-tracked"
                    );
                },
                Err(err) => {
                    warn!(?hook, hash = %event.hash, error = %err, "settlement hook dropped");
                },
            }
        })
    }
}
