//! Accept workers.
//!
//! Every worker runs its own accept loop on the shared listener and serves
//! the connections it accepts one after another. Parallelism comes from
//! running many workers, which the coordinator grows through `WorkerPool`.

use crate::events::EventSender;
use crate::handler;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, trace, warn};

/// First pause after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest pause between accept retries
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before retrying after `failures` consecutive accept errors.
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(factor)
        .min(ACCEPT_BACKOFF_MAX)
}

/// A long-lived accept loop.
pub struct Worker {
    id: usize,
    listener: Arc<TcpListener>,
    events: EventSender,
}

impl Worker {
    pub fn new(id: usize, listener: Arc<TcpListener>, events: EventSender) -> Self {
        Self {
            id,
            listener,
            events,
        }
    }

    /// Accept and serve connections until the coordinator goes away.
    pub async fn run(self) {
        trace!(worker = self.id, "Worker started");
        let mut failures = 0u32;

        loop {
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    warn!(
                        worker = self.id,
                        error = %e,
                        retry_in_ms = pause.as_millis() as u64,
                        "Failed to accept connection"
                    );
                    tokio::time::sleep(pause).await;
                    continue;
                }
            };
            debug!(worker = self.id, peer = %peer, "New connection");

            if self.events.started(self.id).await.is_err() {
                break;
            }

            let record = handler::serve(&mut stream, peer.to_string()).await;

            if self.events.finished(self.id, record).await.is_err() {
                break;
            }

            drop(stream);
        }

        debug!(worker = self.id, "Coordinator gone, worker exiting");
    }
}

/// Spawns workers on the current tokio runtime.
///
/// Owned by the coordinator; nothing else starts workers once the server is
/// running.
pub struct WorkerPool {
    listener: Arc<TcpListener>,
    events: EventSender,
    spawned: usize,
}

impl WorkerPool {
    pub fn new(listener: Arc<TcpListener>, events: EventSender) -> Self {
        Self {
            listener,
            events,
            spawned: 0,
        }
    }

    /// Start one more worker and return its id.
    pub fn spawn(&mut self) -> usize {
        let id = self.spawned;
        self.spawned += 1;

        let worker = Worker::new(id, Arc::clone(&self.listener), self.events.clone());
        tokio::spawn(worker.run());

        id
    }

    /// Number of workers started so far.
    pub fn spawned(&self) -> usize {
        self.spawned
    }
}
