//! Coordinator binary

use clap::{Parser, Subcommand};
use metakv::CoordinatorConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "metakv-coord")]
#[command(about = "metakv metadata coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a coordinator peer
    Serve {
        /// Config file (JSON); CLI flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Local IP this peer announces
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// Base port; consensus and command ports are derived from it
        #[arg(long, default_value = "9000")]
        port: u16,

        /// Seed peer as ip:port for joining the ensemble
        #[arg(long)]
        seed: Option<String>,

        /// Data directory for the consensus engine
        #[arg(long, default_value = "./meta-data")]
        data: PathBuf,

        /// Heartbeat timeout before a data node is marked DOWN (seconds)
        #[arg(long, default_value = "30")]
        node_timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            ip,
            port,
            seed,
            data,
            node_timeout,
        } => {
            let mut coord_config = match config {
                Some(path) => CoordinatorConfig::from_file(path)?,
                None => CoordinatorConfig::default(),
            };
            coord_config.local_ip = ip;
            coord_config.local_port = port;
            coord_config.data_path = data;
            coord_config.node_timeout_secs = node_timeout;
            if let Some(seed) = seed {
                let (seed_ip, seed_port) = metakv::common::parse_endpoint(&seed)?;
                coord_config.seed_ip = seed_ip;
                coord_config.seed_port = seed_port as u16;
            }

            metakv::Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
