//! sdkenv - versioned SDK environment manager CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use sdkenv::ops::install::DEFAULT_INDEX_URL;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "sdkenv")]
#[command(author, version, about = "Manage versioned SDK/toolchain environments")]
pub struct Cli {
    /// Environment index URL
    #[arg(
        long,
        global = true,
        env = "SDKENV_INDEX_URL",
        default_value = DEFAULT_INDEX_URL
    )]
    index_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known environments
    List,
    /// Install an environment
    Install {
        /// Environment version, e.g. v2.6.0
        version: String,
        /// Answer yes to all prompts
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Re-install an environment, updating its repositories in place
    Update {
        /// Environment version
        version: String,
        /// Answer yes to all prompts
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Remove an installed environment
    Remove {
        /// Environment version
        version: String,
        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cmd::list::list(&cli.index_url).await,
        Commands::Install { version, yes } => cmd::install::install(&cli.index_url, &version, yes).await,
        Commands::Update { version, yes } => cmd::update::update(&cli.index_url, &version, yes).await,
        Commands::Remove { version, yes } => cmd::remove::remove(&cli.index_url, &version, yes).await,
    }
}
