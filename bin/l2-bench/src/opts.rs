use crate::cmd::{RunArgs, TransferArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct L2Bench {
    #[command(subcommand)]
    pub cmd: L2BenchSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum L2BenchSubcommand {
    /// Generate a workload, send it and measure throughput and latency
    Run(RunArgs),
    /// Send a series of one-ether transfers from a single key
    Transfer(TransferArgs),
}
