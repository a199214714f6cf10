//! # metakv
//!
//! Metadata coordinator for a sharded, replicated key-value cluster:
//! - Authoritative topology (nodes, partitions, replica sets) persisted
//!   through a replicated consensus log
//! - Heartbeat-driven failover: a dead master is replaced by its first
//!   live slave; a returning master is restored from orphaned partitions
//! - Monotonic cluster epoch advanced by exactly one per reconfiguration
//! - Leader-only writes with follower redirect over the command protocol
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │         Coordinator ensemble             │
//! │  (replicated log elects one leader)      │
//! │   - Leader: serves JOIN/PING/INIT        │
//! │   - Followers: redirect writes, PULL     │
//! └───────────┬──────────────────────────────┘
//!             │ command protocol (framed)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐  ┌──────▼─────┐  ┌────▼───────┐
//! │ Data node  │  │ Data node  │  │ Data node  │
//! │ JOIN/PING  │  │ JOIN/PING  │  │ JOIN/PING  │
//! │ PULL topo  │  │ PULL topo  │  │ PULL topo  │
//! └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! metakv-coord serve --ip 127.0.0.1 --port 9000 --data ./meta-data
//! ```
//!
//! ### Drive it with the CLI
//! ```bash
//! # Create the initial layout with 16 partitions
//! metakv init --num 16 --coordinator 127.0.0.1:9200
//!
//! # Fetch the partitions table
//! metakv pull --coordinator 127.0.0.1:9200
//! ```

pub mod common;
pub mod coordinator;

pub use common::{CoordinatorConfig, Error, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
