mod run;
mod transfer;

pub use run::RunArgs;
pub use transfer::TransferArgs;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Logs to stdout at `info` unless `RUST_LOG` says otherwise.
fn init_tracing() {
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}
