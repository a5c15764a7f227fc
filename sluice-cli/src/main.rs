//! Sluice CLI - runs the gateway and inspects descriptors and libraries

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Acquisition coordinator and range-streaming gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::handle_command(cli.command).await
}
