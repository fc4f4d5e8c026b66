//! Worker to coordinator events.
//!
//! Started and finished events share one ordered queue, so the coordinator
//! sees them exactly in the order the sends completed. A worker's started
//! event is therefore always ahead of its own finished event.
//!
//! Workers hold the sending half only. Counters and history live on the
//! other side, in the coordinator, and are never reachable from a worker.

use crate::record::ConnectionRecord;
use tokio::sync::mpsc;

/// A worker accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    pub worker: usize,
}

/// A worker finished serving a connection.
#[derive(Debug)]
pub struct Finished {
    pub worker: usize,
    pub record: ConnectionRecord,
}

/// Connection lifecycle event.
#[derive(Debug)]
pub enum Event {
    Started(Started),
    Finished(Finished),
}

/// Sending half, cloned into every worker.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Report an accepted connection. Fails once the coordinator is gone.
    pub async fn started(&self, worker: usize) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(Event::Started(Started { worker })).await
    }

    /// Hand over a finished connection's record.
    pub async fn finished(
        &self,
        worker: usize,
        record: ConnectionRecord,
    ) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx
            .send(Event::Finished(Finished { worker, record }))
            .await
    }

    /// Wait until the coordinator has taken every queued event.
    #[cfg(test)]
    pub async fn drained(&self) {
        while self.tx.capacity() < self.tx.max_capacity() {
            tokio::task::yield_now().await;
        }
    }
}

/// Receiving half, owned by the coordinator.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Next event in arrival order, `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Result<Event, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

/// Create the event queue. `capacity` must be non-zero.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, EventReceiver { rx })
}
