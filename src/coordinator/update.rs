//! Update worker
//!
//! A single background consumer drains a FIFO of liveness events and
//! applies them to the topology state machine. Being the sole mutator of
//! the partitions table after INIT, it serializes reconfigurations and
//! keeps epoch advances race-free. Producers (the sweeper, the JOIN
//! handler) never block beyond the enqueue.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::parse_endpoint;
use crate::coordinator::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// Endpoint joined or heart-beat back to life.
    Add,
    /// Endpoint missed heartbeats beyond the timeout.
    Remove,
}

#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::UnboundedSender<(String, UpdateOp)>,
}

impl UpdateQueue {
    /// Enqueue a task; never blocks. Events for a dead worker are dropped
    /// with a log line, which only happens during shutdown.
    pub fn schedule(&self, endpoint: &str, op: UpdateOp) {
        if self.tx.send((endpoint.to_string(), op)).is_err() {
            tracing::warn!("Update worker gone; dropping {:?} for {}", op, endpoint);
        }
    }
}

/// Spawn the consumer task. The queue handle feeds it; the worker exits
/// when every handle is dropped.
pub fn spawn_update_worker(topology: Arc<Topology>) -> (UpdateQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, UpdateOp)>();

    let handle = tokio::spawn(async move {
        while let Some((endpoint, op)) = rx.recv().await {
            let (ip, port) = match parse_endpoint(&endpoint) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!("Bad endpoint in update task: {}", e);
                    continue;
                }
            };

            let result = match op {
                UpdateOp::Add => topology.add_node(&ip, port).await,
                UpdateOp::Remove => topology.off_node(&ip, port).await,
            };
            if let Err(e) = result {
                // The endpoint re-heartbeats or re-times-out, so the next
                // event recomputes the same transition.
                tracing::error!("Update {:?} for {} failed: {}", op, endpoint, e);
            }
        }
        tracing::info!("Update worker drained");
    });

    (UpdateQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::store::MemStore;

    #[tokio::test]
    async fn test_worker_applies_add_then_remove() {
        let topo = Arc::new(Topology::new(Arc::new(MemStore::new())));
        let (queue, handle) = spawn_update_worker(topo.clone());

        queue.schedule("10.0.0.1:5000", UpdateOp::Add);
        queue.schedule("10.0.0.2:5000", UpdateOp::Add);
        queue.schedule("10.0.0.1:5000", UpdateOp::Remove);

        // Dropping the queue closes the channel; the worker drains in
        // order and exits.
        drop(queue);
        handle.await.unwrap();

        let nodes = topo.all_nodes().await.unwrap();
        assert_eq!(nodes.nodes.len(), 2);
        assert!(!nodes.find("10.0.0.1", 5000).unwrap().is_up());
        assert!(nodes.find("10.0.0.2", 5000).unwrap().is_up());
    }

    #[tokio::test]
    async fn test_bad_endpoint_does_not_kill_worker() {
        let topo = Arc::new(Topology::new(Arc::new(MemStore::new())));
        let (queue, handle) = spawn_update_worker(topo.clone());

        queue.schedule("garbage", UpdateOp::Add);
        queue.schedule("10.0.0.1:5000", UpdateOp::Add);

        drop(queue);
        handle.await.unwrap();

        assert_eq!(topo.all_nodes().await.unwrap().nodes.len(), 1);
    }
}
