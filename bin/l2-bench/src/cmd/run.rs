use super::init_tracing;
use alloy::{primitives::Address, transports::http::reqwest::Url};
use clap::{Parser, ValueEnum};
use eyre::Context;
use indicatif::{ProgressBar, ProgressStyle};
use l2_loadgen::{
    AccountPool, AggregateStats, BenchmarkAggregator, ChainEndpoint, FeeModel, FeeParams,
    GeneratedWorkload, GeneratorSettings, PollerConfig, RpcEndpoint, SubmissionSummary, Submitter,
    WorkloadConfig, WorkloadGenerator,
    account::{DEV_MNEMONIC, DEV_RECIPIENT},
};
use serde::Serialize;
use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};
use tokio::signal;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum FeeModelArg {
    Legacy,
    #[default]
    Eip1559,
}

impl From<FeeModelArg> for FeeModel {
    fn from(arg: FeeModelArg) -> Self {
        match arg {
            FeeModelArg::Legacy => Self::Legacy,
            FeeModelArg::Eip1559 => Self::Eip1559,
        }
    }
}

/// Generate a workload, send it and measure throughput and latency
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// RPC endpoint of the node under test
    #[arg(short, long, env = "L2_BENCH_RPC_URL", default_value = "http://localhost:8545")]
    rpc_url: Url,

    /// Number of workers generating transactions concurrently
    #[arg(short, long, default_value_t = 5)]
    workers: usize,

    /// Number of transaction lists per worker
    #[arg(short, long, default_value_t = 2)]
    threads: usize,

    /// Total number of transactions to generate, split evenly over all threads
    #[arg(long, default_value_t = 100)]
    txs: usize,

    /// Give the transactions left over by the even split to the first threads
    #[arg(long)]
    distribute_remainder: bool,

    /// Measurement window in seconds
    #[arg(short, long, default_value_t = 30)]
    duration: u64,

    /// Wait between two chain head polls, in milliseconds
    #[arg(long, default_value_t = 3_000)]
    poll_interval_ms: u64,

    /// Deadline of a single RPC call, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    request_timeout_ms: u64,

    /// Also count blocks skipped between two polls
    #[arg(long)]
    backfill: bool,

    #[arg(long, value_enum, default_value_t)]
    fee_model: FeeModelArg,

    /// Receiver of every transfer
    #[arg(long, default_value_t = DEV_RECIPIENT)]
    recipient: Address,

    /// Sender keys, used round-robin over the threads. Takes precedence over `--mnemonic`
    #[arg(long, value_delimiter = ',')]
    private_keys: Vec<String>,

    /// Derive sender keys from this mnemonic
    #[arg(short, long)]
    mnemonic: Option<String>,

    /// Number of accounts to derive from the mnemonic
    #[arg(short, long, default_value_t = 1)]
    accounts: u32,

    #[arg(long, default_value_t = 0)]
    from_mnemonic_index: u32,

    /// Only measure, without sending the generated workload
    #[arg(long)]
    skip_submit: bool,

    /// Write the results as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Serialize)]
struct BenchmarkMetadata {
    rpc_url: String,
    chain_id: u64,
    workload: WorkloadConfig,
    planned_transactions: usize,
    generated_transactions: usize,
    failed_threads: usize,
    accounts: usize,
    fee: FeeParams,
    submission: Option<SubmissionSummary>,
    duration_secs: u64,
    poll_interval_ms: u64,
    backfill: bool,
}

#[derive(Serialize)]
struct BenchmarkReport {
    metadata: BenchmarkMetadata,
    stats: AggregateStats,
}

impl RunArgs {
    pub async fn run(self) -> eyre::Result<()> {
        init_tracing();

        let request_timeout = Duration::from_millis(self.request_timeout_ms);
        let workload = WorkloadConfig {
            worker_count: self.workers,
            threads_per_worker: self.threads,
            total_transaction_count: self.txs,
            distribute_remainder: self.distribute_remainder,
        };
        workload.validate()?;

        let endpoint = Arc::new(RpcEndpoint::connect_http(self.rpc_url.clone()));
        let settings = GeneratorSettings {
            accounts: self.accounts()?,
            recipient: self.recipient,
            fee_model: self.fee_model.into(),
            request_timeout,
            ..Default::default()
        };
        let generator = WorkloadGenerator::init(endpoint.clone(), settings)
            .await
            .wrap_err_with(|| format!("failed to reach {}", self.rpc_url))?;

        let generated = generator
            .generate(&workload)
            .await
            .context("failed to generate workload")?;
        for failure in &generated.failures {
            warn!(
                worker_id = failure.worker_id,
                thread_id = failure.thread_id,
                built = failure.built,
                error = %failure.error,
                "Thread generated a partial list"
            );
        }

        let aggregator = BenchmarkAggregator::new(
            endpoint.clone(),
            PollerConfig {
                interval: Duration::from_millis(self.poll_interval_ms),
                request_timeout,
                backfill: self.backfill,
            },
        );
        let duration = Duration::from_secs(self.duration);
        let measurement = aggregator.start_measurement();

        let mut interrupted = false;
        let submission = if self.skip_submit {
            None
        } else {
            let submitter = Submitter::new(
                endpoint.clone(),
                aggregator.submissions().clone(),
                request_timeout,
            );
            let progress = progress_bar(&submitter, &generated);
            let summary = tokio::select! {
                summary = submitter.submit_workloads(&generated) => summary,
                _ = signal::ctrl_c() => {
                    warn!("Interrupted while sending");
                    interrupted = true;
                    submitter.summary()
                }
            };
            progress.abort();
            Some(summary)
        };

        if !interrupted {
            let remaining = duration.saturating_sub(measurement.elapsed());
            info!(?remaining, "Waiting for the measurement window to close");
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = signal::ctrl_c() => {
                    warn!("Interrupted, stopping measurement early");
                    interrupted = true;
                }
            }
        }

        let mut stats = aggregator.stop_and_collect(measurement).await;
        let failed_sends = submission.is_some_and(|summary| summary.failed > 0);
        if generated.is_partial() || failed_sends || interrupted {
            stats.mark_partial();
        }
        log_stats(&stats);

        if let Some(path) = &self.report {
            let report = BenchmarkReport {
                metadata: BenchmarkMetadata {
                    rpc_url: self.rpc_url.to_string(),
                    chain_id: generator.factory().chain_id(),
                    workload,
                    planned_transactions: workload.planned_total(),
                    generated_transactions: generated.transaction_count(),
                    failed_threads: generated.failures.len(),
                    accounts: generator.accounts().len(),
                    fee: generator.factory().fee(),
                    submission,
                    duration_secs: self.duration,
                    poll_interval_ms: self.poll_interval_ms,
                    backfill: self.backfill,
                },
                stats,
            };
            let file = File::create(path)
                .wrap_err_with(|| format!("failed to create {}", path.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &report)?;
            info!(path = %path.display(), "Report written");
        }

        Ok(())
    }

    fn accounts(&self) -> eyre::Result<AccountPool> {
        let pool = if !self.private_keys.is_empty() {
            AccountPool::from_private_keys(&self.private_keys)?
        } else if let Some(mnemonic) = &self.mnemonic {
            AccountPool::from_mnemonic(mnemonic, self.from_mnemonic_index, self.accounts)?
        } else if self.accounts > 1 {
            AccountPool::from_mnemonic(DEV_MNEMONIC, self.from_mnemonic_index, self.accounts)?
        } else {
            AccountPool::dev()
        };
        Ok(pool)
    }
}

/// Mirrors the submitter's sent counter into a progress bar until aborted.
fn progress_bar<E: ChainEndpoint>(
    submitter: &Submitter<E>,
    generated: &GeneratedWorkload,
) -> tokio::task::JoinHandle<()> {
    let bar = ProgressBar::new(generated.transaction_count() as u64);
    if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} sent ({per_sec})") {
        bar.set_style(style);
    }
    let sent = submitter.sent_counter();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            bar.set_position(sent.load(Ordering::Relaxed) as u64);
            if bar.position() >= bar.length().unwrap_or_default() {
                bar.finish();
                break;
            }
        }
    })
}

fn log_stats(stats: &AggregateStats) {
    if !stats.has_data() {
        warn!(
            duration = stats.measurement_duration_seconds,
            failed_queries = stats.failed_queries,
            "No transactions observed"
        );
        return;
    }

    info!(
        transactions = stats.total_transactions_observed,
        blocks = stats.blocks_observed,
        duration = stats.measurement_duration_seconds,
        tps = stats.tps,
        "Throughput"
    );
    match stats.average_latency_seconds {
        Some(latency) => info!(
            latency,
            samples = stats.latency_samples,
            "Average settlement latency"
        ),
        None => warn!("None of the sent transactions were seen in a block"),
    }
    if stats.partial {
        warn!("Results are partial, some queries or transactions failed");
    }
}
