//! Common utilities and types shared across metakv

pub mod config;
pub mod error;
pub mod utils;

pub use config::{CoordinatorConfig, CMD_PORT_SHIFT, CONSENSUS_PORT_SHIFT};
pub use error::{Error, Result};
pub use utils::{format_endpoint, parse_endpoint};
