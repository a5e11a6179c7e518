// ============================================================================
// Book Actor
// One task owns each matching engine; callers talk to it through a handle
// ============================================================================

use super::{MatchingEngine, MatchingResult};
use crate::domain::{Order, OrderBookSnapshot, OrderId};
use crate::errors::{MatchingError, VenueError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Requests served by the book task, each with its reply channel
enum BookCommand {
    Submit {
        order: Order,
        reply: oneshot::Sender<Result<MatchingResult, MatchingError>>,
    },
    Cancel {
        order_id: OrderId,
        reply: oneshot::Sender<Option<Order>>,
    },
    Resubmit {
        orders: Vec<Order>,
        reply: oneshot::Sender<Result<usize, MatchingError>>,
    },
    Snapshot {
        full: bool,
        reply: oneshot::Sender<OrderBookSnapshot>,
    },
    OpenOrders {
        reply: oneshot::Sender<Vec<Order>>,
    },
}

/// Cloneable handle to a running book task.
///
/// Requests are applied strictly in the order the task receives them, so
/// submit and cancel on one book never interleave.
#[derive(Clone)]
pub struct BookHandle {
    tx: mpsc::Sender<BookCommand>,
    exchange_id: String,
    pair: String,
}

impl BookHandle {
    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub async fn submit(&self, order: Order) -> Result<MatchingResult, VenueError> {
        let result = self
            .request(|reply| BookCommand::Submit { order, reply })
            .await?;
        Ok(result?)
    }

    /// `None` when the order no longer rests in the book
    pub async fn cancel(&self, order_id: OrderId) -> Result<Option<Order>, VenueError> {
        self.request(|reply| BookCommand::Cancel { order_id, reply })
            .await
    }

    pub async fn resubmit(&self, orders: Vec<Order>) -> Result<usize, VenueError> {
        let result = self
            .request(|reply| BookCommand::Resubmit { orders, reply })
            .await?;
        Ok(result?)
    }

    /// Snapshot at the configured depth, or of every level when `full`
    pub async fn snapshot(&self, full: bool) -> Result<OrderBookSnapshot, VenueError> {
        self.request(|reply| BookCommand::Snapshot { full, reply })
            .await
    }

    pub async fn open_orders(&self) -> Result<Vec<Order>, VenueError> {
        self.request(|reply| BookCommand::OpenOrders { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> BookCommand,
    ) -> Result<T, VenueError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> VenueError {
        VenueError::BookUnavailable(format!("{}/{}", self.exchange_id, self.pair))
    }
}

/// Spawn the task owning `engine`. The task ends once every handle is dropped.
pub fn spawn_book(engine: MatchingEngine, capacity: usize) -> (BookHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = BookHandle {
        tx,
        exchange_id: engine.exchange_id().to_string(),
        pair: engine.pair().symbol.clone(),
    };
    let task = tokio::spawn(book_loop(engine, rx));
    (handle, task)
}

async fn book_loop(mut engine: MatchingEngine, mut rx: mpsc::Receiver<BookCommand>) {
    while let Some(command) = rx.recv().await {
        // a dropped reply receiver means the caller gave up; the command
        // still took effect
        match command {
            BookCommand::Submit { order, reply } => {
                let _ = reply.send(engine.submit(order));
            },
            BookCommand::Cancel { order_id, reply } => {
                let _ = reply.send(engine.cancel(order_id));
            },
            BookCommand::Resubmit { orders, reply } => {
                let _ = reply.send(engine.resubmit_orders(orders));
            },
            BookCommand::Snapshot { full, reply } => {
                let snapshot = if full {
                    engine.full_snapshot()
                } else {
                    engine.snapshot()
                };
                let _ = reply.send(snapshot);
            },
            BookCommand::OpenOrders { reply } => {
                let _ = reply.send(engine.open_orders());
            },
        }
    }
    debug!(
        exchange = engine.exchange_id(),
        pair = %engine.pair().symbol,
        "order book task stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetPair, Quote, Side};
    use crate::engine::factory::MatchingEngineBuilder;
    use crate::interfaces::NoOpEventHandler;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn handle() -> (BookHandle, JoinHandle<()>) {
        let engine = MatchingEngineBuilder::new(
            "x1",
            AssetPair::new(Asset::new("ETH", 8), Asset::new("BTC", 8)),
        )
        .build(Arc::new(NoOpEventHandler))
        .unwrap();
        spawn_book(engine, 16)
    }

    #[tokio::test]
    async fn test_concurrent_submissions_are_serialized() {
        let (book, _task) = handle();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let book = book.clone();
            tasks.push(tokio::spawn(async move {
                let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
                let quote = Quote::limit("x1", "ETHBTC", format!("user{i}"), side, dec!(0.05), dec!(1));
                book.submit(Order::new(quote)).await
            }));
        }
        let mut traded = dec!(0);
        for task in tasks {
            let result = task.await.unwrap().unwrap();
            traded += result.trades.iter().map(|trade| trade.quantity).sum::<rust_decimal::Decimal>();
        }

        // five buys and five sells at one price cross completely
        assert_eq!(traded, dec!(5));
        assert!(book.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_through_handle() {
        let (book, _task) = handle();
        let order = Order::new(Quote::limit("x1", "ETHBTC", "user1", Side::Buy, dec!(0.05), dec!(1)));
        let order_id = order.id;
        book.submit(order).await.unwrap();

        assert!(book.cancel(order_id).await.unwrap().is_some());
        assert!(book.cancel(order_id).await.unwrap().is_none());
        assert!(book.snapshot(true).await.unwrap().bids.is_empty());
    }

    #[tokio::test]
    async fn test_stopped_book_is_unavailable() {
        let (book, task) = handle();
        task.abort();
        let _ = task.await;

        let order = Order::new(Quote::limit("x1", "ETHBTC", "user1", Side::Buy, dec!(0.05), dec!(1)));
        assert!(matches!(
            book.submit(order).await,
            Err(VenueError::BookUnavailable(_))
        ));
    }
}
