//! Leader failover: a new leader rebuilds liveness from the persisted UP
//! set and reloads the epoch before serving, so the table and its version
//! survive the handover unchanged.

use std::sync::Arc;
use std::time::Duration;

use metakv::common::CONSENSUS_PORT_SHIFT;
use metakv::coordinator::leader::LeaderWatch;
use metakv::coordinator::liveness::Liveness;
use metakv::coordinator::store::{ConsensusStore, MemStore};
use metakv::coordinator::topology::Topology;

struct Peer {
    watch: LeaderWatch,
    topology: Arc<Topology>,
    liveness: Arc<Liveness>,
}

fn peer(store: &Arc<MemStore>, ip: &str, base_port: u16) -> Peer {
    let topology = Arc::new(Topology::new(store.clone() as Arc<dyn ConsensusStore>));
    let liveness = Arc::new(Liveness::new());
    let watch = LeaderWatch::new(
        ip,
        base_port,
        Duration::from_millis(100),
        topology.clone(),
        liveness.clone(),
    );
    Peer {
        watch,
        topology,
        liveness,
    }
}

fn elect(store: &Arc<MemStore>, ip: &str, base_port: u16) {
    store.set_leader(Some((ip.to_string(), base_port + CONSENSUS_PORT_SHIFT)));
}

#[tokio::test]
async fn test_failover_preserves_table_and_epoch() {
    let store = Arc::new(MemStore::new());
    let a = peer(&store, "10.1.0.1", 9000);
    let b = peer(&store, "10.1.0.2", 9001);

    // Peer A leads and builds up state: three data nodes, a layout, one
    // failover.
    elect(&store, "10.1.0.1", 9000);
    a.watch.refresh().await;
    assert!(a.watch.is_leader());

    for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        a.topology.add_node(ip, 5000).await.unwrap();
        a.liveness.add(&format!("{}:5000", ip));
    }
    a.topology.distribute(4).await.unwrap();
    a.topology.off_node("10.0.0.1", 5000).await.unwrap();
    let before = a.topology.partitions_table().await.unwrap();
    assert_eq!(before.version, 2);

    // The ensemble elects peer B. A's poll demotes it and clears its
    // liveness; B's poll promotes it.
    elect(&store, "10.1.0.2", 9001);
    a.watch.refresh().await;
    assert!(!a.watch.is_leader());
    assert!(a.liveness.snapshot().is_empty());

    b.watch.refresh().await;
    assert!(b.watch.is_leader());

    // B reloaded the epoch from the persisted table, so its next write
    // continues the sequence instead of rewinding it.
    assert_eq!(b.topology.epoch(), 2);

    // Liveness was rebuilt from the UP set only.
    let mut restored = b.liveness.snapshot();
    restored.sort();
    assert_eq!(restored, vec!["10.0.0.2:5000", "10.0.0.3:5000"]);

    // A PULL served by the new leader returns the same table.
    let after = b.topology.partitions_table().await.unwrap();
    assert_eq!(after, before);

    // The next reconfiguration advances the epoch by exactly one.
    b.topology.off_node("10.0.0.2", 5000).await.unwrap();
    assert_eq!(b.topology.partitions_table().await.unwrap().version, 3);
}

#[tokio::test]
async fn test_promotion_waits_for_election() {
    let store = Arc::new(MemStore::new());
    let a = peer(&store, "10.1.0.1", 9000);

    // No leader known yet: refresh is a no-op.
    a.watch.refresh().await;
    assert!(!a.watch.is_leader());
    assert!(a.watch.leader_hint().is_none());

    elect(&store, "10.1.0.1", 9000);
    a.watch.refresh().await;
    assert!(a.watch.is_leader());
}
