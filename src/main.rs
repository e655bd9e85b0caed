use std::path::PathBuf;

use clap::{Parser, Subcommand};

use host_inventory::commands;
use host_inventory::commands::collect::CollectArgs;

#[derive(Parser)]
#[command(
    name = "host-inventory",
    version,
    about = "Collect inventory from lab hosts over SSH and WinRM"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every candidate host and write the inventory document
    Collect {
        /// Path to config file (default: ~/.config/host-inventory/config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Comma-separated hosts, each `address` or `address=platform`
        #[arg(long, value_delimiter = ',')]
        hosts: Vec<String>,

        /// File with one host per line (same syntax as --hosts, # comments)
        #[arg(long)]
        hosts_file: Option<PathBuf>,

        /// Hosts processed concurrently (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Inventory document path (overrides config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Summary format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Print the last written inventory document
    Show {
        /// Path to config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format (table or json)
        #[arg(long, default_value = "table")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            config,
            hosts,
            hosts_file,
            workers,
            output,
            format,
        } => commands::collect::run(CollectArgs {
            config,
            hosts,
            hosts_file,
            workers,
            output,
            format,
        }),
        Commands::Show { config, format } => commands::show::run(config.as_deref(), &format),
    }
}
