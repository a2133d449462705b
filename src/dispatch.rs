//! At-least-once delivery of unit messages to executors.
//!
//! [`channel`] is the in-process queue: a delivery that is not acked can be
//! put back with [`Delivery::nack`] until it has been handed out
//! `max_deliveries` times.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::job::UnitInput;

/// Everything an executor needs to produce one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMessage {
    pub job_id: String,
    pub unit_index: usize,
    pub input: UnitInput,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch queue is closed")]
    Closed,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, message: UnitMessage) -> Result<(), DispatchError>;
}

struct Envelope {
    message: UnitMessage,
    attempt: u32,
}

/// Producer side of the in-process queue.
#[derive(Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Consumer side of the in-process queue.
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
    requeue: mpsc::WeakUnboundedSender<Envelope>,
    max_deliveries: u32,
}

/// One hand-out of a message. Drop or [`ack`](Delivery::ack) it when done.
pub struct Delivery {
    pub message: UnitMessage,
    /// 1 for the first delivery.
    pub attempt: u32,
    max_deliveries: u32,
    requeue: mpsc::WeakUnboundedSender<Envelope>,
}

pub fn channel(max_deliveries: u32) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let requeue = tx.downgrade();
    (
        QueueSender { tx },
        QueueReceiver {
            rx,
            requeue,
            max_deliveries: max_deliveries.max(1),
        },
    )
}

#[async_trait]
impl Dispatcher for QueueSender {
    async fn dispatch(&self, message: UnitMessage) -> Result<(), DispatchError> {
        debug!(job_id = %message.job_id, unit_index = message.unit_index, "unit dispatched");
        self.tx
            .send(Envelope {
                message,
                attempt: 1,
            })
            .map_err(|_| DispatchError::Closed)
    }
}

impl QueueReceiver {
    /// Next delivery, or `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let envelope = self.rx.recv().await?;
        Some(self.deliver(envelope))
    }

    /// A delivery that is ready right now, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        let envelope = self.rx.try_recv().ok()?;
        Some(self.deliver(envelope))
    }

    fn deliver(&self, envelope: Envelope) -> Delivery {
        Delivery {
            message: envelope.message,
            attempt: envelope.attempt,
            max_deliveries: self.max_deliveries,
            requeue: self.requeue.clone(),
        }
    }
}

impl Delivery {
    pub fn ack(self) {}

    /// Put the message back for another attempt. Returns false when it has
    /// used up its deliveries (or the queue is gone) and was dropped instead.
    pub fn nack(self) -> bool {
        let job_id = self.message.job_id.clone();
        let unit_index = self.message.unit_index;
        if self.attempt >= self.max_deliveries {
            error!(job_id = %job_id, unit_index, attempt = self.attempt, "delivery attempts exhausted, dropping message");
            return false;
        }
        let Some(tx) = self.requeue.upgrade() else {
            error!(job_id = %job_id, unit_index, "dispatch queue closed, dropping message");
            return false;
        };
        let redelivered = tx
            .send(Envelope {
                message: self.message,
                attempt: self.attempt + 1,
            })
            .is_ok();
        if redelivered {
            debug!(job_id = %job_id, unit_index, attempt = self.attempt + 1, "message requeued");
        }
        redelivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(index: usize) -> UnitMessage {
        UnitMessage {
            job_id: "j1".into(),
            unit_index: index,
            input: UnitInput::new(format!("block {index}"), "openai", "alloy"),
        }
    }

    #[tokio::test]
    async fn delivers_in_send_order() {
        let (tx, mut rx) = channel(3);
        tx.dispatch(message(0)).await.unwrap();
        tx.dispatch(message(1)).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.message.unit_index, 0);
        assert_eq!(first.attempt, 1);
        first.ack();
        assert_eq!(rx.recv().await.unwrap().message.unit_index, 1);
    }

    #[tokio::test]
    async fn nack_redelivers_until_exhausted() {
        let (tx, mut rx) = channel(2);
        tx.dispatch(message(0)).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.nack());
        let second = rx.recv().await.unwrap();
        assert_eq!(second.attempt, 2);
        assert!(!second.nack());

        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn closes_when_senders_drop() {
        let (tx, mut rx) = channel(3);
        tx.dispatch(message(0)).await.unwrap();
        drop(tx);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dispatch_after_receiver_drop_fails() {
        let (tx, rx) = channel(3);
        drop(rx);
        assert!(matches!(
            tx.dispatch(message(0)).await,
            Err(DispatchError::Closed)
        ));
    }
}
