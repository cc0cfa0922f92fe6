//! Conman node
//!
//! Runs the P2P connection manager from the command line.

use clap::{Parser, Subcommand};
use conman::cli;
use conman::network::{ConnManConfig, EndpointAddress, DEFAULT_MAX_BUFFER};

#[derive(Parser)]
#[command(name = "conman-node")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "TCP connection manager for a P2P node", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and run until Ctrl+C
    Start {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:9186")]
        bind: EndpointAddress,

        /// Peers to connect to (comma-separated ip:port)
        #[arg(short, long, value_delimiter = ',')]
        connect: Vec<EndpointAddress>,

        /// Drop every inbound connection
        #[arg(long)]
        isolated: bool,

        /// Log every chunk sent and received
        #[arg(long)]
        log_communication: bool,

        /// Maximum unflushed bytes per connection
        #[arg(long, default_value_t = DEFAULT_MAX_BUFFER)]
        max_buffer: usize,
    },

    /// Print the default configuration as JSON
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        Commands::Start {
            bind,
            connect,
            isolated,
            log_communication,
            max_buffer,
        } => {
            let config = ConnManConfig::new(bind)
                .with_isolated(isolated)
                .with_log_communication(log_communication)
                .with_max_buffer(max_buffer);

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_start(config, &connect))?;
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&ConnManConfig::default())?);
        }
    }

    Ok(())
}
