#![forbid(unsafe_code)]
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tbb::blockchain::LedgerState;
use tbb::config::{expand_path, load_config, Config};
use tbb::genesis;
use tbb::node::Node;
use tbb::persistence::{self, FileBlockStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tbb", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launches the node: HTTP API, peer sync and mining
    Run {
        /// TOML config file; flags below override its values
        #[arg(long)]
        config: Option<PathBuf>,
        /// Absolute path to the node data dir
        #[arg(long)]
        datadir: Option<String>,
        /// Exposed IP for communication with peers
        #[arg(long)]
        ip: Option<String>,
        /// Exposed HTTP port for communication with peers
        #[arg(long)]
        port: Option<u16>,
        /// Account credited with block rewards
        #[arg(long)]
        miner: Option<String>,
        /// Bootstrap peer as ip:port, may be repeated
        #[arg(long = "bootstrap")]
        bootstrap: Vec<String>,
        /// Serve and sync without mining
        #[arg(long)]
        disable_mining: bool,
    },
    /// Interacts with balances
    Balances {
        #[command(subcommand)]
        command: BalancesCommands,
    },
    /// Describes the version
    Version,
}

#[derive(Subcommand)]
enum BalancesCommands {
    /// Lists all balances at the latest block
    List {
        /// TOML config file, read for the data dir and difficulty
        #[arg(long)]
        config: Option<PathBuf>,
        /// Absolute path to the node data dir
        #[arg(long)]
        datadir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            datadir,
            ip,
            port,
            miner,
            bootstrap,
            disable_mining,
        } => {
            let mut config = load_config(config.as_deref())?;
            apply_overrides(&mut config, datadir, ip, port, miner, bootstrap, disable_mining);
            config.validate()?;
            run(config).await
        }
        Commands::Balances {
            command: BalancesCommands::List { config, datadir },
        } => {
            let config = load_config(config.as_deref())?;
            list_balances(&config, datadir)
        }
        Commands::Version => {
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

fn apply_overrides(
    config: &mut Config,
    datadir: Option<String>,
    ip: Option<String>,
    port: Option<u16>,
    miner: Option<String>,
    bootstrap: Vec<String>,
    disable_mining: bool,
) {
    if let Some(datadir) = datadir {
        config.database.data_dir = datadir;
    }
    if let Some(ip) = ip {
        config.network.ip = ip;
    }
    if let Some(port) = port {
        config.network.port = port;
    }
    if let Some(miner) = miner {
        config.miner.account = miner;
    }
    if !bootstrap.is_empty() {
        config.network.bootstrap_peers = bootstrap;
    }
    if disable_mining {
        config.miner.enabled = false;
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Launching node {} with data dir {:?}",
        config.listen_addr(),
        config.data_dir()
    );

    let node = Arc::new(Node::open(config)?);
    node.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    })
    .await?;
    Ok(())
}

fn list_balances(config: &Config, datadir: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = match datadir {
        Some(dir) => expand_path(&dir),
        None => config.data_dir(),
    };
    persistence::init_data_dir(&data_dir)?;

    let genesis = genesis::load(&persistence::genesis_path(&data_dir))?;
    let store = FileBlockStore::open(persistence::blocks_db_path(&data_dir))?;
    let mut state = LedgerState::open(genesis.balances, Box::new(store), config.consensus.difficulty)?;

    println!("Accounts balances at {}:", state.latest_block_hash());
    println!("__________________");
    println!();
    let mut balances: Vec<_> = state.balances().iter().collect();
    balances.sort();
    for (account, balance) in balances {
        println!("{}: {}", account, balance);
    }

    state.close()?;
    Ok(())
}
