//! Persisted state records
//!
//! Every entity the coordinator keeps in the replicated store (the node
//! registry, the partitions table, the per-partition replica sets) is a
//! prost message with fixed tags. Writers serialize in full; readers
//! tolerate unknown trailing fields, so records can grow without breaking
//! old peers.

use prost::Message;

use crate::common::format_endpoint;

/// A data server endpoint. `ip == "" && port == 0` is the sentinel for
/// "no live master" in a partition.
#[derive(Clone, PartialEq, Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: i32) -> Self {
        Self { ip: ip.into(), port }
    }

    /// The no-master sentinel.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn is_unset(&self) -> bool {
        self.ip.is_empty() && self.port == 0
    }

    /// Canonical `"ip:port"` form used as the liveness key.
    pub fn endpoint(&self) -> String {
        format_endpoint(&self.ip, self.port)
    }

    pub fn matches(&self, ip: &str, port: i32) -> bool {
        self.ip == ip && self.port == port
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum NodeState {
    Up = 0,
    Down = 1,
}

/// A registered node and its liveness status.
#[derive(Clone, PartialEq, Message)]
pub struct NodeStatus {
    #[prost(message, required, tag = "1")]
    pub node: Node,
    #[prost(enumeration = "NodeState", tag = "2")]
    pub status: i32,
}

impl NodeStatus {
    pub fn up(node: Node) -> Self {
        Self {
            node,
            status: NodeState::Up as i32,
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == NodeState::Up as i32
    }
}

/// The node registry, unique by `(ip, port)`, stored at key `ND`.
#[derive(Clone, PartialEq, Message)]
pub struct Nodes {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<NodeStatus>,
}

impl Nodes {
    pub fn find(&self, ip: &str, port: i32) -> Option<&NodeStatus> {
        self.nodes.iter().find(|ns| ns.node.matches(ip, port))
    }

    pub fn find_mut(&mut self, ip: &str, port: i32) -> Option<&mut NodeStatus> {
        self.nodes.iter_mut().find(|ns| ns.node.matches(ip, port))
    }

    /// All nodes currently marked UP, in registry order.
    pub fn alive(&self) -> Vec<NodeStatus> {
        self.nodes.iter().filter(|ns| ns.is_up()).cloned().collect()
    }
}

/// Current master/slave assignment of one partition.
#[derive(Clone, PartialEq, Message)]
pub struct Partition {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(message, required, tag = "2")]
    pub master: Node,
    #[prost(message, repeated, tag = "3")]
    pub slaves: Vec<Node>,
}

impl Partition {
    /// A partition with no live master is unavailable for writes.
    pub fn is_orphaned(&self) -> bool {
        self.master.is_unset()
    }
}

/// The designed replica set of a partition, stored at `PART:<id>`.
/// Diverges from the live `Partition` only transiently during failover.
#[derive(Clone, PartialEq, Message)]
pub struct Replicaset {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(message, repeated, tag = "2")]
    pub nodes: Vec<Node>,
}

/// The authoritative partition placement, stored at key `MT`.
///
/// `version` is the cluster epoch: strictly monotonic, advanced by exactly
/// one on every persisted mutation.
#[derive(Clone, PartialEq, Message)]
pub struct PartitionsTable {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, repeated, tag = "2")]
    pub info: Vec<Partition>,
}

/// Decode a record, surfacing failures as `Corruption`.
pub fn decode_record<M: Message + Default>(key: &str, value: &[u8]) -> crate::Result<M> {
    M::decode(value).map_err(|e| {
        tracing::error!("Failed to decode record at {}: {}", key, e);
        crate::Error::Corruption(format!("decode {} failed: {}", key, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> PartitionsTable {
        PartitionsTable {
            version: 7,
            info: vec![
                Partition {
                    id: 0,
                    master: Node::new("10.0.0.1", 5000),
                    slaves: vec![Node::new("10.0.0.2", 5000), Node::new("10.0.0.3", 5000)],
                },
                Partition {
                    id: 1,
                    master: Node::unset(),
                    slaves: vec![Node::new("10.0.0.1", 5000)],
                },
            ],
        }
    }

    #[test]
    fn test_node_sentinel() {
        assert!(Node::unset().is_unset());
        assert!(!Node::new("10.0.0.1", 5000).is_unset());
        assert_eq!(Node::new("10.0.0.1", 5000).endpoint(), "10.0.0.1:5000");
    }

    #[test]
    fn test_nodes_lookup_and_alive() {
        let mut nodes = Nodes::default();
        nodes.nodes.push(NodeStatus::up(Node::new("10.0.0.1", 5000)));
        nodes.nodes.push(NodeStatus {
            node: Node::new("10.0.0.2", 5000),
            status: NodeState::Down as i32,
        });

        assert!(nodes.find("10.0.0.1", 5000).unwrap().is_up());
        assert!(!nodes.find("10.0.0.2", 5000).unwrap().is_up());
        assert!(nodes.find("10.0.0.3", 5000).is_none());

        let alive = nodes.alive();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].node.endpoint(), "10.0.0.1:5000");
    }

    #[test]
    fn test_table_round_trip() {
        // Encode then decode must be the identity on logical content,
        // including the order of repeated groups.
        let table = sample_table();
        let bytes = table.encode_to_vec();
        let decoded: PartitionsTable = decode_record("MT", &bytes).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.info[0].slaves[0].endpoint(), "10.0.0.2:5000");
        assert!(decoded.info[1].is_orphaned());
    }

    #[test]
    fn test_nodes_round_trip() {
        let mut nodes = Nodes::default();
        for i in 1..=4 {
            nodes
                .nodes
                .push(NodeStatus::up(Node::new(format!("10.0.0.{}", i), 5000 + i)));
        }
        let bytes = nodes.encode_to_vec();
        let decoded: Nodes = decode_record("ND", &bytes).unwrap();
        assert_eq!(decoded, nodes);
    }

    #[test]
    fn test_replicaset_round_trip() {
        let rs = Replicaset {
            id: 3,
            nodes: vec![Node::new("10.0.0.1", 5000), Node::new("10.0.0.2", 5000)],
        };
        let bytes = rs.encode_to_vec();
        let decoded: Replicaset = decode_record("PART:3", &bytes).unwrap();
        assert_eq!(decoded, rs);
    }

    #[test]
    fn test_decode_garbage_is_corruption() {
        let err = decode_record::<PartitionsTable>("MT", &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, crate::Error::Corruption(_)));
    }
}
