//! Coordinator server
//!
//! Assembles the consensus store, topology, liveness, update worker, and
//! leader watch, then runs the command listener plus the two periodic
//! tasks (leader poll, liveness sweep). All background tasks are owned
//! here and joined on shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::CoordinatorConfig;
use crate::coordinator::dispatch::Dispatcher;
use crate::coordinator::leader::LeaderWatch;
use crate::coordinator::liveness::Liveness;
use crate::coordinator::protocol::{read_frame, write_frame, MetaRequest};
use crate::coordinator::store::{ConsensusStore, RocksStore};
use crate::coordinator::topology::Topology;
use crate::coordinator::update::{spawn_update_worker, UpdateOp, UpdateQueue};

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Run with the local single-peer engine.
    pub async fn serve(self) -> crate::Result<()> {
        self.config.validate()?;
        let store = Arc::new(RocksStore::open(
            &self.config.data_path,
            &self.config.local_ip,
            self.config.consensus_port(),
        )?);
        self.serve_with_store(store).await
    }

    /// Run on top of any consensus engine.
    pub async fn serve_with_store(self, store: Arc<dyn ConsensusStore>) -> crate::Result<()> {
        let config = self.config;
        tracing::info!(
            "Starting coordinator on {}:{} (consensus {}, cmd {})",
            config.local_ip,
            config.local_port,
            config.consensus_port(),
            config.local_port + crate::common::CMD_PORT_SHIFT,
        );

        let topology = Arc::new(Topology::new(store.clone()));
        let liveness = Arc::new(Liveness::new());
        let (updates, worker_handle) = spawn_update_worker(topology.clone());
        let leader = Arc::new(LeaderWatch::new(
            &config.local_ip,
            config.local_port,
            config.redirect_timeout(),
            topology.clone(),
            liveness.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            topology.clone(),
            liveness.clone(),
            updates.clone(),
            leader.clone(),
        ));

        // Commands are not served until an election has produced a leader.
        while store.leader().await.is_none() {
            tracing::info!("Wait leader ...");
            tokio::select! {
                _ = tokio::time::sleep(config.cron_interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted before election finished");
                    return Ok(());
                }
            }
        }
        leader.refresh().await;

        let listener = TcpListener::bind(config.cmd_addr()?).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = spawn_leader_poller(leader.clone(), config.cron_interval(), shutdown_rx.clone());
        let sweeper = spawn_liveness_sweeper(
            leader.clone(),
            liveness.clone(),
            updates.clone(),
            config.node_timeout(),
            config.cron_interval(),
            shutdown_rx.clone(),
        );

        tracing::info!("Coordinator ready (leader: {})", leader.is_leader());

        tokio::select! {
            res = run_listener(listener, dispatcher, shutdown_rx) => {
                if let Err(e) = res {
                    tracing::error!("Command listener error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
            }
        }

        // Stop the periodic tasks, then give the update worker a moment
        // to drain. Events lost here are recomputed by the next leader's
        // sweep.
        let _ = shutdown_tx.send(true);
        let _ = poller.await;
        let _ = sweeper.await;
        drop(updates);
        if tokio::time::timeout(Duration::from_secs(5), worker_handle)
            .await
            .is_err()
        {
            tracing::warn!("Update worker still busy; abandoning queued tasks");
        }

        Ok(())
    }
}

/// Poll the consensus engine's leader view every tick.
pub fn spawn_leader_poller(
    leader: Arc<LeaderWatch>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tick.tick() => leader.refresh().await,
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Expire silent data nodes every tick; each expiry becomes a REMOVE task
/// for the update worker. The sweep itself never blocks on I/O.
pub fn spawn_liveness_sweeper(
    leader: Arc<LeaderWatch>,
    liveness: Arc<Liveness>,
    updates: UpdateQueue,
    node_timeout: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !leader.is_leader() {
                        continue;
                    }
                    for endpoint in liveness.sweep(node_timeout) {
                        tracing::info!("Node {} missed heartbeats; scheduling removal", endpoint);
                        updates.schedule(&endpoint, UpdateOp::Remove);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Accept command connections until shutdown; one task per connection.
pub async fn run_listener(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> crate::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_conn(stream, dispatcher).await {
                        tracing::debug!("Connection {} closed: {}", peer, e);
                    }
                });
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

async fn serve_conn(mut stream: TcpStream, dispatcher: Arc<Dispatcher>) -> crate::Result<()> {
    loop {
        let request: MetaRequest = match read_frame(&mut stream).await {
            Ok(request) => request,
            // Clean close between frames.
            Err(crate::Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(())
            }
            Err(e) => return Err(e),
        };
        let response = dispatcher.dispatch(request).await;
        write_frame(&mut stream, &response).await?;
    }
}
