//! Topology state machine
//!
//! All reconfiguration flows through here: node registration, DOWN/UP
//! transitions with master failover and restoration, and the initial
//! partition placement. Mutations run under a coarse lock and advance the
//! cluster epoch by exactly one per persisted table write.

use prost::Message;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::coordinator::records::{
    decode_record, Node, NodeState, NodeStatus, Nodes, Partition, PartitionsTable, Replicaset,
};
use crate::coordinator::store::{
    partition_key, ConsensusStore, KEY_NODES, KEY_PARTITION_NUM, KEY_TABLE,
};

pub struct Topology {
    store: Arc<dyn ConsensusStore>,
    /// Coarse lock over load-decide-persist cycles.
    node_lock: tokio::sync::Mutex<()>,
    /// Cached epoch; reloaded from the persisted table on promotion.
    epoch: AtomicI64,
}

impl Topology {
    pub fn new(store: Arc<dyn ConsensusStore>) -> Self {
        Self {
            store,
            node_lock: tokio::sync::Mutex::new(()),
            epoch: AtomicI64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConsensusStore> {
        &self.store
    }

    /// Cached epoch; readable without the topology lock.
    pub fn epoch(&self) -> i64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Reload the cached epoch from the persisted table. Called on leader
    /// promotion, before any write; an absent table resets to 0.
    pub async fn reload_epoch(&self) -> crate::Result<i64> {
        let version = match self.store.read(KEY_TABLE).await {
            Ok(value) => decode_record::<PartitionsTable>(KEY_TABLE, &value)?.version,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };
        self.epoch.store(version, Ordering::SeqCst);
        tracing::info!("Reloaded epoch: {}", version);
        Ok(version)
    }

    // === Reads (dirty, no topology lock) ===

    /// The full node registry.
    pub async fn all_nodes(&self) -> crate::Result<Nodes> {
        let value = self.store.dirty_read(KEY_NODES).await?;
        decode_record(KEY_NODES, &value)
    }

    /// The authoritative partitions table.
    pub async fn partitions_table(&self) -> crate::Result<PartitionsTable> {
        let value = self.store.dirty_read(KEY_TABLE).await?;
        decode_record(KEY_TABLE, &value)
    }

    /// The fixed partition count; 0 while the cluster is undistributed.
    pub async fn partition_count(&self) -> u32 {
        match self.store.dirty_read(KEY_PARTITION_NUM).await {
            Ok(value) => String::from_utf8_lossy(&value).parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Endpoints of all UP nodes; empty before the first JOIN.
    pub async fn alive_endpoints(&self) -> crate::Result<Vec<String>> {
        match self.all_nodes().await {
            Ok(nodes) => Ok(nodes
                .alive()
                .iter()
                .map(|ns| ns.node.endpoint())
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    // === Mutations (topology lock) ===

    /// Register a node, or flip a returning one back to UP.
    ///
    /// A first-time JOIN only touches the registry; the partitions table is
    /// not written. A DOWN node coming back is restored as master wherever
    /// its partitions are orphaned.
    pub async fn add_node(&self, ip: &str, port: i32) -> crate::Result<()> {
        let _guard = self.node_lock.lock().await;

        let mut nodes = match self.all_nodes().await {
            Ok(nodes) => nodes,
            Err(e) if e.is_not_found() => Nodes::default(),
            Err(e) => return Err(e),
        };

        match nodes.find(ip, port) {
            Some(ns) if ns.is_up() => Ok(()),
            Some(_) => self.set_node_status(&mut nodes, ip, port, NodeState::Up).await,
            None => {
                nodes.nodes.push(NodeStatus::up(Node::new(ip, port)));
                self.persist_nodes(&nodes).await
            }
        }
    }

    /// Take a node out of service after missed heartbeats.
    ///
    /// Every partition it mastered is handed to its first UP slave; with no
    /// UP slave left, the partition is orphaned and the former master is
    /// kept as a slave for later restoration.
    pub async fn off_node(&self, ip: &str, port: i32) -> crate::Result<()> {
        let _guard = self.node_lock.lock().await;

        let mut nodes = self.all_nodes().await?;
        let alive = nodes.alive();

        self.set_node_status(&mut nodes, ip, port, NodeState::Down)
            .await?;

        let mut table = match self.partitions_table().await {
            Ok(table) => table,
            // No table yet; the registry update is all there is to do.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut changed = false;
        for p in table.info.iter_mut() {
            if !p.master.matches(ip, port) {
                continue;
            }
            changed = true;

            let former = p.master.clone();
            match p
                .slaves
                .iter()
                .position(|s| is_alive(&alive, &s.ip, s.port))
            {
                Some(j) => {
                    tracing::info!(
                        "Partition {}: promoting slave {} over {}",
                        p.id,
                        p.slaves[j].endpoint(),
                        former.endpoint()
                    );
                    p.master = p.slaves[j].clone();
                    p.slaves[j] = former;
                }
                None => {
                    tracing::info!("Partition {}: no slave to use", p.id);
                    p.slaves.push(former);
                    p.master = Node::unset();
                }
            }
        }

        if !changed {
            return Ok(());
        }
        self.persist_table(&mut table).await
    }

    /// Restore a returning node as master of its orphaned partitions.
    pub async fn on_node(&self, ip: &str, port: i32) -> crate::Result<()> {
        let _guard = self.node_lock.lock().await;
        self.on_node_locked(ip, port).await
    }

    /// Create the initial partition layout. Rejected once a layout exists.
    pub async fn distribute(&self, num: u32) -> crate::Result<()> {
        let _guard = self.node_lock.lock().await;

        if num == 0 {
            return Err(crate::Error::Corruption("partition num must be positive".into()));
        }
        if self.partition_count().await != 0 {
            return Err(crate::Error::Corruption("already distributed".into()));
        }

        let alive = match self.all_nodes().await {
            Ok(nodes) => nodes.alive(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        if alive.is_empty() {
            return Err(crate::Error::Corruption("no nodes".into()));
        }

        let spread = reorganize(&alive);
        let count = spread.len();

        let mut table = PartitionsTable::default();
        for i in 0..num {
            let idx = i as usize;
            let members = vec![
                spread[idx % count].clone(),
                spread[(idx + 1) % count].clone(),
                spread[(idx + 2) % count].clone(),
            ];

            let replicaset = Replicaset {
                id: i,
                nodes: members.clone(),
            };
            self.store
                .write(&partition_key(i), replicaset.encode_to_vec())
                .await?;

            table.info.push(Partition {
                id: i,
                master: members[0].clone(),
                slaves: members[1..].to_vec(),
            });
        }

        // Partition count goes first so a failed table write leaves the
        // layout attempt visible instead of silently re-runnable.
        self.store
            .write(KEY_PARTITION_NUM, num.to_string().into_bytes())
            .await?;

        self.persist_table(&mut table).await
    }

    // === Internals (lock held) ===

    /// Persist a status flip; flipping to UP also restores orphaned
    /// masterships. Same-status writes are elided.
    async fn set_node_status(
        &self,
        nodes: &mut Nodes,
        ip: &str,
        port: i32,
        status: NodeState,
    ) -> crate::Result<()> {
        let ns = nodes
            .find_mut(ip, port)
            .ok_or_else(|| crate::Error::NotFound(format!("unknown node {}:{}", ip, port)))?;
        if ns.status == status as i32 {
            return Ok(());
        }
        ns.status = status as i32;
        self.persist_nodes(nodes).await?;

        if status == NodeState::Up {
            self.on_node_locked(ip, port).await?;
        }
        Ok(())
    }

    async fn on_node_locked(&self, ip: &str, port: i32) -> crate::Result<()> {
        let mut table = match self.partitions_table().await {
            Ok(table) => table,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut changed = false;
        for p in table.info.iter_mut() {
            if !p.is_orphaned() {
                continue;
            }
            if let Some(j) = p.slaves.iter().position(|s| s.matches(ip, port)) {
                changed = true;
                tracing::info!("Partition {}: restoring master {}:{}", p.id, ip, port);
                p.master = p.slaves[j].clone();
                let last = p.slaves.len() - 1;
                p.slaves[j] = p.slaves[last].clone();
                p.slaves.pop();
            }
        }

        if !changed {
            return Ok(());
        }
        self.persist_table(&mut table).await
    }

    async fn persist_nodes(&self, nodes: &Nodes) -> crate::Result<()> {
        self.store.write(KEY_NODES, nodes.encode_to_vec()).await
    }

    /// Stamp the next epoch onto the table, persist it, and advance the
    /// cache only after the write commits.
    async fn persist_table(&self, table: &mut PartitionsTable) -> crate::Result<()> {
        let cached = self.epoch.load(Ordering::SeqCst);
        if table.version != cached {
            tracing::warn!(
                "Version mismatch: cached = {}, persisted = {}",
                cached,
                table.version
            );
        }
        table.version = cached + 1;
        self.store.write(KEY_TABLE, table.encode_to_vec()).await?;
        self.epoch.store(table.version, Ordering::SeqCst);
        tracing::info!("Advanced epoch to {}", table.version);
        Ok(())
    }
}

fn is_alive(alive: &[NodeStatus], ip: &str, port: i32) -> bool {
    alive.iter().any(|ns| ns.node.matches(ip, port))
}

/// Spread nodes so consecutive entries come from different hosts wherever
/// possible: bucket by IP (ascending), then round-robin popping the tail of
/// each non-empty bucket until all are drained.
fn reorganize(alive: &[NodeStatus]) -> Vec<Node> {
    let mut buckets: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
    for ns in alive {
        buckets.entry(ns.node.ip.as_str()).or_default().push(&ns.node);
    }

    let mut spread = Vec::with_capacity(alive.len());
    while spread.len() < alive.len() {
        for bucket in buckets.values_mut() {
            if let Some(node) = bucket.pop() {
                spread.push(node.clone());
            }
        }
    }
    spread
}
