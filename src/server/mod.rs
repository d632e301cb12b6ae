//! Server Module
//!
//! TCP ingress for activity pings, plus the wiring that runs the tracker,
//! the store and the expiration sweeper together.

mod client;
mod codec;
mod command;
mod config;
mod handler;

pub use client::{Client, ClientError};
pub use command::{Command, ProtocolError, Response};
pub use config::Config;
pub use codec::{CommandCodec, MAX_LINE_LENGTH};
pub use handler::Handler;

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, StoreError};
use crate::metrics::SweepMetrics;
use crate::storage::{ExpirationStore, MemoryStore, PersistentStore};
use crate::sweeper::{StopCoordinator, Sweeper, SweeperHandle};
use crate::tracker::ActivityTracker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Startup failure
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Open the store the configuration asks for. Journal replay runs on the
/// blocking pool.
pub async fn open_store(config: &Config) -> Result<Arc<dyn ExpirationStore>, StoreError> {
    match config.persistence() {
        Some(persistent) => {
            info!(path = %persistent.path.display(), "Using journal-backed store");
            let store =
                tokio::task::spawn_blocking(move || PersistentStore::open(persistent)).await??;
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::with_shard_amount(config.shards())))
        }
    }
}

/// Activity ingress server
pub struct ActivityServer {
    listener: TcpListener,
    tracker: ActivityTracker,
    metrics: Arc<SweepMetrics>,
}

impl ActivityServer {
    /// Bind the ingress listener
    pub async fn bind(
        addr: &str,
        tracker: ActivityTracker,
        metrics: Arc<SweepMetrics>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            tracker,
            metrics,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        info!("Activity ingress listening on {}", self.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    info!("New connection from {}", peer_addr);

                    let tracker = self.tracker.clone();
                    let metrics = self.metrics.clone();
                    let shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        let framed = Framed::new(socket, Handler::codec());
                        let handler = Handler::new(tracker, metrics);

                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = handler.run(framed) => {
                                if let Err(e) = result {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            }
                        }

                        info!("Connection closed: {}", peer_addr);
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }

        info!("Activity ingress stopped");
        Ok(())
    }
}

/// Tracker, sweeper and ingress running together
pub struct Service {
    tracker: ActivityTracker,
    sweeper: SweeperHandle,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
}

impl Service {
    /// Validate config, open the store, then start sweeper and ingress
    pub async fn start(
        config: Config,
        coordinator: Arc<dyn StopCoordinator>,
    ) -> Result<Self, ServerError> {
        Self::start_with_clock(config, coordinator, Arc::new(SystemClock)).await
    }

    pub async fn start_with_clock(
        config: Config,
        coordinator: Arc<dyn StopCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let store = open_store(&config).await?;

        let tracker =
            ActivityTracker::new(store.clone(), clock.clone(), config.default_idle_timeout)?;
        let sweeper = Sweeper::new(store, coordinator, clock, config.sweeper())?;
        let metrics = sweeper.metrics().clone();

        let server = ActivityServer::bind(&config.addr(), tracker.clone(), metrics).await?;
        let local_addr = server.local_addr()?;

        let sweeper = sweeper.spawn();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(server.run(shutdown.clone()));

        Ok(Self {
            tracker,
            sweeper,
            server,
            shutdown,
            local_addr,
        })
    }

    pub fn tracker(&self) -> &ActivityTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<SweepMetrics> {
        self.sweeper.metrics()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting pings, then drain the sweeper
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.shutdown.cancel();
        self.server.await??;
        self.sweeper.shutdown().await?;
        Ok(())
    }
}
