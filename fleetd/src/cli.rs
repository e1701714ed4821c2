use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetd", version, about = "Fleet control plane daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control plane with a config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
}
