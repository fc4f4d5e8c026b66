//! TCP server startup and shutdown.
//!
//! Binds the shared listener, starts the initial workers and hands control
//! to the coordinator until a shutdown signal arrives.

use crate::config::Config;
use crate::coordinator::{Coordinator, ServerState};
use crate::error::ServerError;
use crate::events::{self, EventReceiver, EventSender};
use crate::report::ReportSink;
use crate::worker::WorkerPool;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Server instance
pub struct Server {
    config: Config,
    listener: Arc<TcpListener>,
    sender: EventSender,
    receiver: EventReceiver,
}

impl Server {
    /// Bind the listener. Must be called from within a tokio runtime.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config.listen.parse().map_err(|source| ServerError::Address {
            addr: config.listen.clone(),
            source,
        })?;

        let listener = create_listener(addr, config.backlog)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (sender, receiver) = events::channel(config.event_queue);

        Ok(Server {
            config,
            listener: Arc::new(listener),
            sender,
            receiver,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Get a handle on the event queue for testing
    #[cfg(test)]
    pub fn events(&self) -> EventSender {
        self.sender.clone()
    }

    /// Start the initial workers and run the coordinator until `shutdown`
    /// resolves. Returns the final state after the report was generated.
    pub async fn run<R, F>(self, sink: R, shutdown: F) -> ServerState
    where
        R: ReportSink,
        F: Future<Output = ()>,
    {
        let local_addr = self.local_addr();
        let Server {
            config,
            listener,
            sender,
            receiver,
        } = self;

        let mut pool = WorkerPool::new(listener, sender);
        for _ in 0..config.initial_workers {
            pool.spawn();
        }

        if let Ok(addr) = local_addr {
            info!(
                address = %addr,
                workers = config.initial_workers,
                low_water_mark = config.low_water_mark,
                capacity_mode = ?config.capacity_mode,
                "Server listening"
            );
        }

        let state = ServerState::new(
            config.initial_workers,
            config.low_water_mark,
            config.capacity_mode,
        );

        Coordinator::new(state, receiver, pool, sink)
            .run(shutdown)
            .await
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received terminate"),
    }
}

fn create_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CsvReport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn test_config() -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            initial_workers: 3,
            low_water_mark: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = Config {
            listen: "not an address".to_string(),
            ..test_config()
        };
        assert!(matches!(
            Server::bind(config),
            Err(ServerError::Address { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_fails_on_taken_port() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            listen: taken.local_addr().unwrap().to_string(),
            ..test_config()
        };
        assert!(matches!(Server::bind(config), Err(ServerError::Bind { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_clients_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let events = server.events();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(CsvReport::new(dir.path()), async move {
            let _ = shutdown_rx.await;
        }));

        // Hold five connections open at once: more than the initial workers,
        // so the pool has to grow before all of them are served.
        let mut clients = Vec::new();
        for i in 0..5 {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let line = format!("client {i}\n");
            client.write_all(line.as_bytes()).await.unwrap();
            let mut echoed = vec![0u8; line.len()];
            client.read_exact(&mut echoed).await.unwrap();
            assert_eq!(echoed, line.as_bytes());
            clients.push(client);
        }

        for mut client in clients {
            client.write_all(b"bye\n").await.unwrap();
            let mut echoed = [0u8; 4];
            client.read_exact(&mut echoed).await.unwrap();
            client.shutdown().await.unwrap();
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).await.unwrap();
        }
        events.drained().await;

        shutdown_tx.send(()).unwrap();
        let state = handle.await.unwrap();

        assert_eq!(state.total_connections_ever(), 5);
        assert_eq!(state.history().len(), 5);
        assert_eq!(state.live_connections(), 0);
        assert!(state.workers() >= 5);
        assert_eq!(state.peak_live_connections(), 5);
        for record in state.history() {
            assert_eq!(record.request_count, 2);
        }

        // Clients hung up one after another while all five were open.
        let at_close: Vec<usize> = state
            .history()
            .iter()
            .map(|r| r.connections_at_close)
            .collect();
        assert_eq!(at_close, vec![5, 4, 3, 2, 1]);

        let reports: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(reports.len(), 1);
    }
}
