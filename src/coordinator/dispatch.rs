//! Command dispatcher
//!
//! Routes structured requests to their handlers. Writes (JOIN, INIT) and
//! leader-bound reads (PING) execute locally only on the leader; a
//! follower forwards them over the redirect channel and relays the
//! leader's response verbatim. PULL is served locally from a dirty read
//! on every peer.

use std::sync::Arc;

use crate::coordinator::leader::LeaderWatch;
use crate::coordinator::liveness::Liveness;
use crate::coordinator::protocol::{CmdType, MetaRequest, MetaResponse, PingHint, StatusCode};
use crate::coordinator::records::PartitionsTable;
use crate::coordinator::topology::Topology;
use crate::coordinator::update::{UpdateOp, UpdateQueue};

pub struct Dispatcher {
    topology: Arc<Topology>,
    liveness: Arc<Liveness>,
    updates: UpdateQueue,
    leader: Arc<LeaderWatch>,
}

fn status_for(e: &crate::Error) -> StatusCode {
    match e {
        crate::Error::NotLeader(_) | crate::Error::Unavailable(_) => StatusCode::NotLeader,
        crate::Error::Corruption(_) | crate::Error::InvalidConfig(_) => StatusCode::Invalid,
        _ => StatusCode::Internal,
    }
}

impl Dispatcher {
    pub fn new(
        topology: Arc<Topology>,
        liveness: Arc<Liveness>,
        updates: UpdateQueue,
        leader: Arc<LeaderWatch>,
    ) -> Self {
        Self {
            topology,
            liveness,
            updates,
            leader,
        }
    }

    pub async fn dispatch(&self, request: MetaRequest) -> MetaResponse {
        match CmdType::try_from(request.cmd) {
            Ok(CmdType::Join) => self.handle_join(request).await,
            Ok(CmdType::Ping) => self.handle_ping(request).await,
            Ok(CmdType::Pull) => self.handle_pull(request).await,
            Ok(CmdType::Init) => self.handle_init(request).await,
            Err(_) => MetaResponse::error(request.cmd, StatusCode::Invalid, "unknown command"),
        }
    }

    /// A data node announces itself. The registry write happens inline;
    /// the queued task re-runs it idempotently and performs any DOWN→UP
    /// restoration in update-worker order.
    async fn handle_join(&self, request: MetaRequest) -> MetaResponse {
        let Some(join) = request.join.clone() else {
            return MetaResponse::error(request.cmd, StatusCode::Invalid, "missing join payload");
        };
        if !self.leader.is_leader() {
            return self.redirect(request).await;
        }
        if join.node.is_unset() {
            return MetaResponse::error(request.cmd, StatusCode::Invalid, "empty node endpoint");
        }

        if let Err(e) = self.topology.add_node(&join.node.ip, join.node.port).await {
            tracing::error!("JOIN {} failed: {}", join.node.endpoint(), e);
            return MetaResponse::error(request.cmd, status_for(&e), e.to_string());
        }

        let endpoint = join.node.endpoint();
        self.liveness.add(&endpoint);
        self.updates.schedule(&endpoint, UpdateOp::Add);
        tracing::info!("Node {} joined", endpoint);

        MetaResponse {
            epoch: self.topology.epoch(),
            ..MetaResponse::ok(request.cmd)
        }
    }

    /// Heartbeat. Refreshes liveness and returns the current epoch so the
    /// caller can detect a stale view and PULL. A swept endpoint is told
    /// to re-JOIN rather than silently resurrected.
    async fn handle_ping(&self, request: MetaRequest) -> MetaResponse {
        let Some(ping) = request.ping.clone() else {
            return MetaResponse::error(request.cmd, StatusCode::Invalid, "missing ping payload");
        };
        if !self.leader.is_leader() {
            return self.redirect(request).await;
        }

        let known = self.liveness.touch(&ping.node.endpoint());
        let epoch = self.topology.epoch();
        let hint = if !known {
            PingHint::Rejoin
        } else if ping.epoch < epoch {
            PingHint::StaleEpoch
        } else {
            PingHint::Ok
        };

        MetaResponse {
            epoch,
            hint: hint as i32,
            ..MetaResponse::ok(request.cmd)
        }
    }

    /// Topology pull, served locally on every peer. Before INIT there is
    /// no table yet; an empty one (epoch 0) is a normal bootstrap answer.
    async fn handle_pull(&self, request: MetaRequest) -> MetaResponse {
        match self.topology.partitions_table().await {
            Ok(table) => MetaResponse {
                table: Some(table),
                ..MetaResponse::ok(request.cmd)
            },
            Err(e) if e.is_not_found() => MetaResponse {
                table: Some(PartitionsTable::default()),
                ..MetaResponse::ok(request.cmd)
            },
            Err(e) => {
                tracing::error!("PULL failed: {}", e);
                MetaResponse::error(request.cmd, status_for(&e), e.to_string())
            }
        }
    }

    /// Initial placement; rejected once a layout exists.
    async fn handle_init(&self, request: MetaRequest) -> MetaResponse {
        let Some(init) = request.init.clone() else {
            return MetaResponse::error(request.cmd, StatusCode::Invalid, "missing init payload");
        };
        if !self.leader.is_leader() {
            return self.redirect(request).await;
        }

        match self.topology.distribute(init.num).await {
            Ok(()) => {
                tracing::info!("Distributed {} partitions", init.num);
                MetaResponse::ok(request.cmd)
            }
            Err(e) => {
                tracing::error!("INIT {} failed: {}", init.num, e);
                MetaResponse::error(request.cmd, status_for(&e), e.to_string())
            }
        }
    }

    async fn redirect(&self, request: MetaRequest) -> MetaResponse {
        let cmd = request.cmd;
        match self.leader.redirect(&request).await {
            Ok(response) => response,
            Err(_) => MetaResponse::not_leader(cmd, self.leader.leader_hint()),
        }
    }
}
