use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use mychain_core::{ChainContext, ChainError, Config, NetworkSimulator, Result};

#[derive(Parser)]
#[command(name = "mychain")]
#[command(about = "MyChain ledger - single-process PoW chain with a simulated economy")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "mychain.toml")]
    config: PathBuf,

    /// Data directory (overrides config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and initialize the data directory
    Init,

    /// Run the market simulation
    Run {
        /// How long to run before shutting down, in seconds
        #[arg(long, default_value = "60")]
        duration: u64,
    },

    /// Print chain and wallet state
    Show {
        /// Print every block instead of the summary
        #[arg(long)]
        blocks: bool,
    },

    /// Verify chain integrity
    Validate,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = if cli.config.exists() {
        Config::load_from_file(&cli.config)?
    } else {
        Config::default()
    };
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    match cli.command {
        Commands::Init => {
            config.save_to_file(&cli.config)?;
            let context = ChainContext::load(config)?;
            println!("Configuration written to {}", cli.config.display());
            println!("Supply wallet: {}", context.supply_address());
            println!("Chain length:  {}", context.chain_len());
        }
        Commands::Run { duration } => {
            let context = Arc::new(ChainContext::load(config)?);
            let simulator = NetworkSimulator::new(Arc::clone(&context));
            simulator.start();
            info!("Simulation running for {duration} s");
            std::thread::sleep(Duration::from_secs(duration));
            simulator.stop();

            println!("Wallets: {}", context.registry().user_count());
            println!("Blocks:  {}", context.chain_len());
            println!("Price:   {:.6} USD", context.current_price());
        }
        Commands::Show { blocks } => {
            let context = ChainContext::load(config)?;
            println!(
                "Chain '{}': {} block(s), price {:.6} USD",
                context.config().consensus.chain_name,
                context.chain_len(),
                context.current_price()
            );
            if blocks {
                for (i, block) in context.list_blocks().iter().enumerate() {
                    println!(
                        "#{i}  {}  {} tx  nonce {}",
                        block.hash,
                        block.transactions.len(),
                        block.nonce
                    );
                }
            }
            for wallet in context.list_wallets() {
                println!(
                    "{}  {:.3} SC  {:.2} USD",
                    wallet.address(),
                    wallet.balance,
                    wallet.usd_balance
                );
            }
        }
        Commands::Validate => {
            let context = ChainContext::load(config)?;
            if context.validate() {
                println!("Chain is valid ({} blocks)", context.chain_len());
            } else {
                return Err(ChainError::IntegrityViolation(
                    "chain failed validation".to_string(),
                ));
            }
        }
    }
    Ok(())
}
