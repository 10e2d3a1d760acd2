use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "shardgroup-cmd")]
#[command(about = "Command-line utility for running regroup sessions over JSON shards")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a regroup script against a shard
    Run {
        /// Path to the shard JSON file
        #[arg(long)]
        shard: String,

        /// Path to the JSON script: a list of regroup commands
        #[arg(long)]
        script: String,

        /// Path to an engine configuration JSON file
        #[arg(long)]
        config: Option<String>,

        /// Session memory limit in bytes
        #[arg(long, default_value_t = 256 << 20)]
        memory: u64,
    },

    /// Display a summary of a shard's fields
    Inspect {
        /// Path to the shard JSON file
        shard: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            shard,
            script,
            config,
            memory,
        } => commands::run::run(shard, script, config, memory),
        Commands::Inspect { shard } => commands::inspect::run(shard),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
