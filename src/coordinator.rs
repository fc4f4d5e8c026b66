//! The coordinator: sole owner of the connection counters and history.
//!
//! Workers report through the event queue and never see `ServerState`.
//! The coordinator applies one event at a time, in arrival order, so the
//! counters need no locking. It also owns the `WorkerPool` and decides when the pool grows.
//!
//! ## Scaling policy
//!
//! Spare capacity starts at the initial worker count. Each started
//! connection either spawns a worker (when spare capacity has fallen to the
//! low-water mark) or consumes one unit of spare capacity, never both.
//! In `Literal` mode spare capacity is never given back, so once the mark
//! is reached every new connection spawns a worker. `Replenish` mode
//! returns one unit per finished connection.

use crate::events::{Event, EventReceiver, Finished, Started};
use crate::record::ConnectionRecord;
use crate::report::ReportSink;
use crate::worker::WorkerPool;
use chrono::Local;
use std::future::Future;
use tracing::{debug, error, info};

/// How spare capacity evolves when connections finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapacityMode {
    /// Never replenished: sustained load grows the pool without bound.
    #[default]
    Literal,
    /// One unit is returned for every finished connection.
    Replenish,
}

/// What the scaling policy decided for a started connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Spare capacity was consumed.
    UseSpare,
    /// A new worker must be spawned.
    SpawnWorker,
}

/// Counters and history, mutated only by the coordinator.
#[derive(Debug)]
pub struct ServerState {
    total_connections_ever: u64,
    spare_capacity: usize,
    live_connections: usize,
    peak_live_connections: usize,
    workers: usize,
    low_water_mark: usize,
    mode: CapacityMode,
    history: Vec<ConnectionRecord>,
}

impl ServerState {
    /// Seed the state for `initial_workers` already running workers.
    pub fn new(initial_workers: usize, low_water_mark: usize, mode: CapacityMode) -> Self {
        Self {
            total_connections_ever: 0,
            spare_capacity: initial_workers,
            live_connections: 0,
            peak_live_connections: 0,
            workers: initial_workers,
            low_water_mark,
            mode,
            history: Vec::new(),
        }
    }

    /// Apply a started event and return the scaling decision.
    pub fn connection_started(&mut self) -> ScaleDecision {
        self.live_connections += 1;
        self.peak_live_connections = self.peak_live_connections.max(self.live_connections);
        self.total_connections_ever += 1;

        if self.spare_capacity <= self.low_water_mark {
            self.workers += 1;
            ScaleDecision::SpawnWorker
        } else {
            self.spare_capacity -= 1;
            ScaleDecision::UseSpare
        }
    }

    /// Apply a finished event, appending the record to the history.
    pub fn connection_finished(&mut self, mut record: ConnectionRecord) {
        record.connections_at_close = self.live_connections;
        self.history.push(record);
        self.live_connections = self.live_connections.saturating_sub(1);

        if self.mode == CapacityMode::Replenish {
            self.spare_capacity = (self.spare_capacity + 1).min(self.workers);
        }
    }

    pub fn total_connections_ever(&self) -> u64 {
        self.total_connections_ever
    }

    pub fn spare_capacity(&self) -> usize {
        self.spare_capacity
    }

    pub fn live_connections(&self) -> usize {
        self.live_connections
    }

    pub fn peak_live_connections(&self) -> usize {
        self.peak_live_connections
    }

    /// Workers started so far, initial ones included.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Completed connections in completion order.
    pub fn history(&self) -> &[ConnectionRecord] {
        &self.history
    }
}

/// The single control loop of the server.
pub struct Coordinator<R> {
    state: ServerState,
    events: EventReceiver,
    pool: WorkerPool,
    sink: R,
}

impl<R: ReportSink> Coordinator<R> {
    pub fn new(state: ServerState, events: EventReceiver, pool: WorkerPool, sink: R) -> Self {
        Self {
            state,
            events,
            pool,
            sink,
        }
    }

    /// Process events in arrival order until `shutdown` resolves, then
    /// write the report.
    ///
    /// Shutdown wins over pending events: whatever is still queued when it
    /// fires is abandoned along with the open connections.
    pub async fn run<F>(mut self, shutdown: F) -> ServerState
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                Some(event) = self.events.recv() => match event {
                    Event::Started(started) => self.on_started(started),
                    Event::Finished(finished) => self.on_finished(finished),
                },
            }
        }

        self.shutdown()
    }

    fn on_started(&mut self, started: Started) {
        match self.state.connection_started() {
            ScaleDecision::UseSpare => {
                debug!(
                    worker = started.worker,
                    spare = self.state.spare_capacity(),
                    live = self.state.live_connections(),
                    "Connection started"
                );
            }
            ScaleDecision::SpawnWorker => {
                let id = self.pool.spawn();
                debug!(
                    worker = started.worker,
                    new_worker = id,
                    workers = self.pool.spawned(),
                    live = self.state.live_connections(),
                    "Connection started, pool grown"
                );
            }
        }
    }

    fn on_finished(&mut self, finished: Finished) {
        let Finished { worker, record } = finished;
        debug!(
            worker,
            peer = %record.host_name,
            bytes = record.bytes_transferred,
            requests = record.request_count,
            live = self.state.live_connections(),
            "Connection finished"
        );
        self.state.connection_finished(record);
    }

    fn shutdown(mut self) -> ServerState {
        let timestamp = Local::now();
        let state = self.state;

        if let Err(e) = self.sink.generate(&timestamp, state.history()) {
            error!(error = %e, "Failed to generate report");
        }

        println!("Total connections made: {}", state.history().len());
        info!(
            total_connections = state.total_connections_ever(),
            completed = state.history().len(),
            live = state.live_connections(),
            peak_live = state.peak_live_connections(),
            workers = state.workers(),
            "Shutting down"
        );

        state
    }
}
