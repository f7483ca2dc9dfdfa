//! kvring CLI
//!
//! Command-line interface for a sharded node pool.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use kvring::{Client, ClientConfig, NodeConfig, Result, StatItem, StatsTarget};
use tracing_subscriber::{fmt, EnvFilter};

/// kvring CLI
#[derive(Parser, Debug)]
#[command(name = "kvring-cli")]
#[command(about = "Client for a consistently hashed pool of RESP servers")]
#[command(version)]
struct Args {
    /// Node as alias=host:port[@weight] (repeatable)
    #[arg(short, long = "node", value_name = "NODE")]
    nodes: Vec<NodeConfig>,

    /// TOML configuration file (nodes from --node are appended)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database to select
    #[arg(long)]
    db: Option<u32>,

    /// Password for every node given with --node
    #[arg(short, long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete keys
    Del {
        /// The keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Increment a counter
    Incr {
        key: String,

        #[arg(short, long, default_value = "1", allow_hyphen_values = true)]
        by: i64,
    },

    /// Ping every live node
    Ping,

    /// Show which node a key maps to
    Locate {
        key: String,
    },

    /// Print INFO of every live node
    Info,

    /// Print summed statistics across nodes
    Stats,
}

fn main() {
    // Logs go to stderr so command output stays pipeable
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvring=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match args.config {
        Some(ref path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };

    for node in &args.nodes {
        let mut node = node.clone();
        if let Some(ref password) = args.password {
            node = node.password(password.clone());
        }
        config.nodes.push(node);
    }
    if let Some(db) = args.db {
        config.default_db = db;
    }

    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    tracing::debug!("kvring-cli v{} with {} nodes", kvring::VERSION, config.nodes.len());

    let mut client = Client::new(config)?;

    match args.command {
        Commands::Get { key } => match client.get(&key)? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Set { key, value } => {
            client.set(&key, &value)?;
            println!("OK");
        }
        Commands::Del { keys } => {
            println!("(integer) {}", client.del(&keys)?);
        }
        Commands::Incr { key, by } => {
            println!("(integer) {}", client.incr_by(&key, by)?);
        }
        Commands::Ping => {
            client.ping()?;
            println!("PONG");
        }
        Commands::Locate { key } => {
            let node = client.node_for_key(&key)?;
            println!("{} -> {}", key, node);
        }
        Commands::Info => {
            for (alias, text) in client.info()? {
                println!("# {}", alias);
                println!("{}", text.trim_end());
            }
        }
        Commands::Stats => {
            let stats = client.stats()?;
            for alias in stats.nodes() {
                let version = stats.version(alias).unwrap_or_else(|_| "?".to_string());
                let uptime = stats
                    .uptime(alias)
                    .map(|d| format!("{}s", d.as_secs()))
                    .unwrap_or_else(|_| "?".to_string());
                println!("{}: version {} up {}", alias, version, uptime);
            }
            for item in [
                StatItem::ConnectedClients,
                StatItem::UsedMemory,
                StatItem::TotalCommandsProcessed,
                StatItem::KeyspaceHits,
                StatItem::KeyspaceMisses,
            ] {
                match stats.value(StatsTarget::All, item) {
                    Ok(value) => println!("{}: {}", item.key(), value),
                    Err(e) => tracing::debug!("{}", e),
                }
            }
        }
    }

    client.shutdown();
    Ok(())
}
