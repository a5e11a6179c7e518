// ============================================================================
// Event Handler Interface
// Pub/sub contract for order, book and settlement events
// ============================================================================

use crate::domain::{
    Order, OrderBookSnapshot, OrderId, OrderStatus, Settlement, SettlementId, SettlementState,
    Trade,
};
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Events published by the venue. Delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Order rejected with reason
    OrderRejected {
        order_id: OrderId,
        customer_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// One side of a trade, published to the customer owning `order`
    OrderFill {
        customer_id: String,
        order: Order,
        trade: Trade,
        timestamp: DateTime<Utc>,
    },

    /// Order (or its residue) added to book
    OrderAddedToBook {
        order_id: OrderId,
        customer_id: String,
        price: Price,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Order left the book without filling completely
    OrderCancelled {
        order_id: OrderId,
        customer_id: String,
        status: OrderStatus,
        timestamp: DateTime<Utc>,
    },

    BookUpdate {
        snapshot: OrderBookSnapshot,
        timestamp: DateTime<Utc>,
    },

    /// Published to both counter-parties after every settlement transition
    SettlementStateChanged {
        settlement_id: SettlementId,
        customer_ids: [String; 2],
        state: SettlementState,
        timestamp: DateTime<Utc>,
    },

    /// The initiate contract is confirmed; the participant may now lock funds
    SettlementParticipate {
        settlement_id: SettlementId,
        customer_id: String,
        settlement: Box<Settlement>,
        timestamp: DateTime<Utc>,
    },
}

/// Subscription key an event is delivered under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Customer(String),
    Settlement(SettlementId),
    Book { exchange_id: String, pair: String },
}

impl EngineEvent {
    /// Keys subscribers receive this event under
    pub fn keys(&self) -> Vec<EventKey> {
        match self {
            EngineEvent::OrderRejected { customer_id, .. }
            | EngineEvent::OrderFill { customer_id, .. }
            | EngineEvent::OrderAddedToBook { customer_id, .. }
            | EngineEvent::OrderCancelled { customer_id, .. } => {
                vec![EventKey::Customer(customer_id.clone())]
            },
            EngineEvent::BookUpdate { snapshot, .. } => vec![EventKey::Book {
                exchange_id: snapshot.exchange_id.clone(),
                pair: snapshot.pair.clone(),
            }],
            EngineEvent::SettlementStateChanged {
                settlement_id,
                customer_ids,
                ..
            } => {
                let mut keys = vec![EventKey::Settlement(*settlement_id)];
                keys.extend(customer_ids.iter().cloned().map(EventKey::Customer));
                keys
            },
            EngineEvent::SettlementParticipate {
                settlement_id,
                customer_id,
                ..
            } => vec![
                EventKey::Settlement(*settlement_id),
                EventKey::Customer(customer_id.clone()),
            ],
        }
    }
}

/// Event handler trait for publishing venue events
/// Implementations can handle logging, notifications, websocket fan-out, etc.
pub trait EventHandler: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: EngineEvent);

    /// Batch event handler (optional optimization)
    fn on_events(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.on_event(event);
        }
    }
}

/// No-op event handler for testing
pub struct NoOpEventHandler;

impl EventHandler for NoOpEventHandler {
    fn on_event(&self, _event: EngineEvent) {
        // Do nothing
    }
}

/// Logging event handler
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn on_event(&self, event: EngineEvent) {
        tracing::debug!(keys = ?event.keys(), "venue event: {:?}", event);
    }
}

/// Forwards every event into a crossbeam channel
pub struct ChannelEventHandler {
    sender: Sender<EngineEvent>,
}

impl ChannelEventHandler {
    pub fn unbounded() -> (Self, Receiver<EngineEvent>) {
        let (sender, receiver) = channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl EventHandler for ChannelEventHandler {
    fn on_event(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            tracing::warn!("event subscriber disconnected, dropping event");
        }
    }
}
