mod cmd;
mod opts;

use clap::Parser;
use opts::{L2Bench, L2BenchSubcommand};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = L2Bench::parse();

    match args.cmd {
        L2BenchSubcommand::Run(cmd) => cmd.run().await,
        L2BenchSubcommand::Transfer(cmd) => cmd.run().await,
    }
}
