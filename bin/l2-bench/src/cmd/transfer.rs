use super::init_tracing;
use alloy::{
    primitives::Address, signers::local::PrivateKeySigner, transports::http::reqwest::Url,
};
use clap::Parser;
use eyre::Context;
use l2_loadgen::{
    DirectTransfer, RpcEndpoint,
    account::{DEV_PRIVATE_KEY, DEV_RECIPIENT},
};
use std::{sync::Arc, time::Duration};
use tracing::info;

/// Send a series of one-ether transfers from a single key
#[derive(Parser, Debug)]
pub struct TransferArgs {
    /// RPC endpoint of the node under test
    #[arg(short, long, env = "L2_BENCH_RPC_URL", default_value = "http://localhost:8545")]
    rpc_url: Url,

    /// Key of the sending account
    #[arg(long, default_value = DEV_PRIVATE_KEY)]
    private_key: String,

    #[arg(long, default_value_t = DEV_RECIPIENT)]
    recipient: Address,

    /// Number of transfers to send
    #[arg(short, long, default_value_t = 10)]
    iterations: usize,

    /// Pause between two transfers, in milliseconds
    #[arg(long, default_value_t = 50)]
    pause_ms: u64,
}

impl TransferArgs {
    pub async fn run(self) -> eyre::Result<()> {
        init_tracing();

        let signer = self
            .private_key
            .trim()
            .parse::<PrivateKeySigner>()
            .context("invalid private key")?;
        let endpoint = Arc::new(RpcEndpoint::connect_http(self.rpc_url.clone()));

        let hashes = DirectTransfer::new(endpoint, signer, self.recipient)
            .with_pause(Duration::from_millis(self.pause_ms))
            .run(self.iterations)
            .await
            .wrap_err_with(|| format!("transfer against {} failed", self.rpc_url))?;

        info!(sent = hashes.len(), "Done");
        Ok(())
    }
}
