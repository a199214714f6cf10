//! Leader lifecycle
//!
//! Every peer periodically asks the consensus engine who leads. On
//! self-promotion the peer rebuilds liveness from the UP set and reloads
//! the cached epoch before serving any write; on observing a remote leader
//! it opens a redirect channel to that peer's command port. The channel and
//! the cached identity live behind one small state object with explicit
//! transitions instead of nullable handles at call sites.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::{CMD_PORT_SHIFT, CONSENSUS_PORT_SHIFT};
use crate::coordinator::client::MetaClient;
use crate::coordinator::liveness::Liveness;
use crate::coordinator::protocol::{MetaRequest, MetaResponse};
use crate::coordinator::records::Node;
use crate::coordinator::store::ConsensusStore;
use crate::coordinator::topology::Topology;

#[derive(Default)]
struct WatchState {
    /// `(ip, cmd_port)` of the leader we last acted on.
    leader: Option<(String, u16)>,
    is_self: bool,
}

pub struct LeaderWatch {
    local_ip: String,
    local_port: u16,
    redirect_timeout: Duration,
    topology: Arc<Topology>,
    liveness: Arc<Liveness>,
    state: Mutex<WatchState>,
    /// Redirect channel; only the poller replaces it, redirects borrow it.
    channel: tokio::sync::Mutex<Option<MetaClient>>,
}

impl LeaderWatch {
    pub fn new(
        local_ip: &str,
        local_port: u16,
        redirect_timeout: Duration,
        topology: Arc<Topology>,
        liveness: Arc<Liveness>,
    ) -> Self {
        Self {
            local_ip: local_ip.to_string(),
            local_port,
            redirect_timeout,
            topology,
            liveness,
            state: Mutex::new(WatchState::default()),
            channel: tokio::sync::Mutex::new(None),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().unwrap().is_self
    }

    /// Best-effort leader hint for NOT_LEADER responses.
    pub fn leader_hint(&self) -> Option<Node> {
        self.state
            .lock()
            .unwrap()
            .leader
            .as_ref()
            .map(|(ip, cmd_port)| Node::new(ip.clone(), *cmd_port as i32))
    }

    /// One poll of the consensus engine's leader view; called by the
    /// lifecycle poller every cron tick.
    pub async fn refresh(&self) {
        let Some((ip, consensus_port)) = self.topology.store().leader().await else {
            tracing::info!("Wait leader ...");
            return;
        };
        let base = consensus_port.saturating_sub(CONSENSUS_PORT_SHIFT);
        let cmd_port = base + CMD_PORT_SHIFT;

        {
            let state = self.state.lock().unwrap();
            if state.leader.as_ref() == Some(&(ip.clone(), cmd_port)) {
                return;
            }
        }

        if ip == self.local_ip && base == self.local_port {
            self.promote(ip, cmd_port).await;
        } else {
            self.follow(ip, cmd_port).await;
        }
    }

    async fn promote(&self, ip: String, cmd_port: u16) {
        *self.channel.lock().await = None;

        tracing::info!("Become leader");
        match self.become_leader().await {
            Ok(()) => {
                let mut state = self.state.lock().unwrap();
                state.leader = Some((ip, cmd_port));
                state.is_self = true;
                tracing::info!("Become leader success");
            }
            Err(e) => {
                // Leave the state untouched; the next poll retries the
                // promotion before any write is served.
                tracing::error!("Become leader failed: {}", e);
            }
        }
    }

    /// Rebuild the liveness map from the UP set and reload the cached
    /// epoch, so monotonicity survives the failover.
    async fn become_leader(&self) -> crate::Result<()> {
        let endpoints = self.topology.alive_endpoints().await?;
        self.liveness.restore(endpoints);
        self.topology.reload_epoch().await?;
        Ok(())
    }

    async fn follow(&self, ip: String, cmd_port: u16) {
        let was_self = {
            let mut state = self.state.lock().unwrap();
            let was_self = state.is_self;
            state.leader = Some((ip.clone(), cmd_port));
            state.is_self = false;
            was_self
        };
        if was_self {
            tracing::info!("Lost leadership to {}:{}", ip, cmd_port);
            self.liveness.clear();
        }

        let addr = format!("{}:{}", ip, cmd_port);
        let mut channel = self.channel.lock().await;
        *channel = None;
        match MetaClient::connect(&addr, self.redirect_timeout).await {
            Ok(client) => {
                tracing::info!("Connected to leader {}", addr);
                *channel = Some(client);
            }
            Err(e) => {
                // Clear the cached identity so the next poll reconnects.
                tracing::error!("Connect to leader {} failed: {}", addr, e);
                self.state.lock().unwrap().leader = None;
            }
        }
    }

    /// Forward a write to the leader and relay its response verbatim.
    pub async fn redirect(&self, request: &MetaRequest) -> crate::Result<MetaResponse> {
        let mut channel = self.channel.lock().await;
        let Some(client) = channel.as_mut() else {
            return Err(crate::Error::Unavailable("no leader connection".into()));
        };

        match client.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!("Redirect to leader failed: {}", e);
                *channel = None;
                self.state.lock().unwrap().leader = None;
                Err(crate::Error::Unavailable(format!("redirect failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::store::{ConsensusStore, MemStore};

    fn watch_over(store: Arc<MemStore>) -> LeaderWatch {
        let topology = Arc::new(Topology::new(store as Arc<dyn ConsensusStore>));
        let liveness = Arc::new(Liveness::new());
        LeaderWatch::new(
            "127.0.0.1",
            9000,
            Duration::from_millis(100),
            topology,
            liveness,
        )
    }

    #[tokio::test]
    async fn test_no_leader_known() {
        let store = Arc::new(MemStore::new());
        let watch = watch_over(store);

        watch.refresh().await;
        assert!(!watch.is_leader());
        assert!(watch.leader_hint().is_none());
    }

    #[tokio::test]
    async fn test_self_promotion() {
        let store = Arc::new(MemStore::new());
        store.set_leader(Some(("127.0.0.1".to_string(), 9000 + CONSENSUS_PORT_SHIFT)));
        let watch = watch_over(store);

        watch.refresh().await;
        assert!(watch.is_leader());
        let hint = watch.leader_hint().unwrap();
        assert_eq!(hint.port, (9000 + CMD_PORT_SHIFT) as i32);
    }

    #[tokio::test]
    async fn test_promotion_restores_liveness_and_epoch() {
        let store = Arc::new(MemStore::new());
        let topology = Arc::new(Topology::new(store.clone() as Arc<dyn ConsensusStore>));
        topology.add_node("10.0.0.1", 5000).await.unwrap();
        topology.add_node("10.0.0.2", 5000).await.unwrap();
        topology.distribute(2).await.unwrap();
        topology.off_node("10.0.0.2", 5000).await.unwrap();

        let liveness = Arc::new(Liveness::new());
        store.set_leader(Some(("127.0.0.1".to_string(), 9000 + CONSENSUS_PORT_SHIFT)));
        let watch = LeaderWatch::new(
            "127.0.0.1",
            9000,
            Duration::from_millis(100),
            Arc::new(Topology::new(store.clone() as Arc<dyn ConsensusStore>)),
            liveness.clone(),
        );

        watch.refresh().await;
        assert!(watch.is_leader());
        // Only the UP node is restored; the epoch picks up the persisted
        // failover version.
        assert_eq!(liveness.snapshot(), vec!["10.0.0.1:5000".to_string()]);
    }

    #[tokio::test]
    async fn test_demotion_clears_liveness() {
        let store = Arc::new(MemStore::new());
        store.set_leader(Some(("127.0.0.1".to_string(), 9000 + CONSENSUS_PORT_SHIFT)));

        let topology = Arc::new(Topology::new(store.clone() as Arc<dyn ConsensusStore>));
        let liveness = Arc::new(Liveness::new());
        let watch = LeaderWatch::new(
            "127.0.0.1",
            9000,
            Duration::from_millis(100),
            topology,
            liveness.clone(),
        );

        watch.refresh().await;
        assert!(watch.is_leader());
        liveness.add("10.0.0.1:5000");

        // Another peer wins; this one demotes and drops its liveness map.
        // The connect attempt fails (nothing listens), which only clears
        // the cached identity.
        store.set_leader(Some(("127.0.0.9".to_string(), 9000 + CONSENSUS_PORT_SHIFT)));
        watch.refresh().await;
        assert!(!watch.is_leader());
        assert!(liveness.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_without_channel() {
        let store = Arc::new(MemStore::new());
        let watch = watch_over(store);

        let err = watch
            .redirect(&MetaRequest::init(4))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Unavailable(_)));
    }
}
