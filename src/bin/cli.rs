//! CLI for coordinator operations
//!
//! Speaks the framed command protocol against a coordinator's command
//! port. Covers the operator surface (INIT, PULL) and the data-node
//! handshake (JOIN, PING) for debugging.

use clap::{Parser, Subcommand};
use metakv::common::parse_endpoint;
use metakv::coordinator::client::MetaClient;
use metakv::coordinator::protocol::{MetaRequest, MetaResponse, PingHint, StatusCode};
use metakv::coordinator::records::Node;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "metakv")]
#[command(about = "metakv coordinator CLI")]
#[command(version)]
struct Cli {
    /// Coordinator command address (ip:port)
    #[arg(long, default_value = "127.0.0.1:9200")]
    coordinator: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "3000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the initial partition layout
    Init {
        /// Number of partitions; fixed for the cluster's lifetime
        #[arg(long)]
        num: u32,
    },

    /// Fetch the partitions table
    Pull,

    /// Announce a data node
    Join {
        /// Data node endpoint (ip:port)
        node: String,
    },

    /// Send one heartbeat for a data node
    Ping {
        /// Data node endpoint (ip:port)
        node: String,

        /// Last epoch the node has seen
        #[arg(long, default_value = "0")]
        epoch: i64,
    },
}

fn print_status(resp: &MetaResponse) {
    match StatusCode::try_from(resp.code) {
        Ok(StatusCode::Ok) => println!("OK"),
        Ok(StatusCode::NotLeader) => match &resp.leader {
            Some(leader) => println!("NOT_LEADER (try {})", leader.endpoint()),
            None => println!("NOT_LEADER (no leader known)"),
        },
        Ok(code) => println!("{:?}: {}", code, resp.msg),
        Err(_) => println!("Unknown status {}: {}", resp.code, resp.msg),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout_ms);
    let mut client = MetaClient::connect(&cli.coordinator, timeout).await?;

    match cli.command {
        Commands::Init { num } => {
            let resp = client.call(&MetaRequest::init(num)).await?;
            print_status(&resp);
        }

        Commands::Pull => {
            let resp = client.call(&MetaRequest::pull()).await?;
            print_status(&resp);
            if let Some(table) = resp.table {
                println!("version: {}", table.version);
                for p in &table.info {
                    let slaves: Vec<String> = p.slaves.iter().map(|s| s.endpoint()).collect();
                    let master = if p.master.is_unset() {
                        "<none>".to_string()
                    } else {
                        p.master.endpoint()
                    };
                    println!(
                        "  partition {}: master {} slaves [{}]",
                        p.id,
                        master,
                        slaves.join(", ")
                    );
                }
            }
        }

        Commands::Join { node } => {
            let (ip, port) = parse_endpoint(&node)?;
            let resp = client.call(&MetaRequest::join(Node::new(ip, port))).await?;
            print_status(&resp);
            if resp.is_ok() {
                println!("epoch: {}", resp.epoch);
            }
        }

        Commands::Ping { node, epoch } => {
            let (ip, port) = parse_endpoint(&node)?;
            let resp = client
                .call(&MetaRequest::ping(Node::new(ip, port), epoch))
                .await?;
            print_status(&resp);
            if resp.is_ok() {
                println!("epoch: {}", resp.epoch);
                match PingHint::try_from(resp.hint) {
                    Ok(PingHint::Rejoin) => println!("hint: re-join required"),
                    Ok(PingHint::StaleEpoch) => println!("hint: stale epoch, pull the table"),
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
