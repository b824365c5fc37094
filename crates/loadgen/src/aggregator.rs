//! Throughput and latency measurement over a bounded observation window.

use crate::{
    endpoint::ChainEndpoint,
    poller::{BlockObservation, ChainPoller, PollReport, PollerConfig},
};
use alloy::primitives::{BlockNumber, TxHash};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Settlement time, in unix seconds, of every transaction seen in a mined block.
#[derive(Debug, Default)]
pub struct SettlementIndex {
    settled_at: Mutex<HashMap<TxHash, u64>>,
}

impl SettlementIndex {
    pub fn record(&self, hashes: impl IntoIterator<Item = TxHash>, block_timestamp: u64) {
        let mut settled_at = self.settled_at.lock();
        for hash in hashes {
            settled_at.insert(hash, block_timestamp);
        }
    }

    pub fn get(&self, hash: TxHash) -> Option<u64> {
        self.settled_at.lock().get(&hash).copied()
    }

    pub fn len(&self) -> usize {
        self.settled_at.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.settled_at.lock().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<TxHash, u64> {
        self.settled_at.lock().clone()
    }
}

/// Submission time, in fractional unix seconds, of every transaction sent during a run.
#[derive(Debug, Default)]
pub struct SubmissionLog {
    submitted_at: Mutex<HashMap<TxHash, f64>>,
}

impl SubmissionLog {
    pub fn record(&self, hash: TxHash, at: SystemTime) {
        self.submitted_at.lock().insert(hash, unix_seconds(at));
    }

    pub fn record_now(&self, hash: TxHash) {
        self.record(hash, SystemTime::now());
    }

    pub fn len(&self) -> usize {
        self.submitted_at.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted_at.lock().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<TxHash, f64> {
        self.submitted_at.lock().clone()
    }
}

fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_else(|_| {
            warn!("system clock before UNIX_EPOCH, using 0");
            0.0
        })
}

/// Transactions per second; zero when nothing was observed or no time elapsed.
pub fn throughput(transactions: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if transactions == 0 || seconds <= 0.0 {
        return 0.0;
    }
    transactions as f64 / seconds
}

/// Mean of `settled - submitted` over the transactions present in both maps.
///
/// Returns the mean and the number of samples, or `None` when there is no overlap. Block
/// timestamps have one-second resolution, so a transaction settled in the second it was sent can
/// look settled before it was submitted; such deltas count as zero.
pub fn average_latency(
    settlements: &HashMap<TxHash, u64>,
    submissions: &HashMap<TxHash, f64>,
) -> Option<(f64, usize)> {
    let (sum, samples) = settlements
        .iter()
        .filter_map(|(hash, settled)| {
            let submitted = submissions.get(hash)?;
            Some((*settled as f64 - submitted).max(0.0))
        })
        .fold((0.0, 0usize), |(sum, count), latency| (sum + latency, count + 1));

    (samples > 0).then(|| (sum / samples as f64, samples))
}

/// Mean of the raw settlement timestamps. This is an absolute time, not a latency.
pub fn mean_settlement_timestamp(settlements: &HashMap<TxHash, u64>) -> Option<f64> {
    if settlements.is_empty() {
        return None;
    }
    let sum = settlements.values().map(|ts| *ts as f64).sum::<f64>();
    Some(sum / settlements.len() as f64)
}

#[derive(Clone, Debug, Serialize)]
pub struct AggregateStats {
    pub total_transactions_observed: usize,
    pub measurement_duration_seconds: f64,
    pub tps: f64,
    /// `None` when no submitted transaction was seen settled.
    pub average_latency_seconds: Option<f64>,
    pub latency_samples: usize,
    /// Average of absolute block timestamps, kept for comparison with older reports that
    /// published this figure as "latency".
    pub mean_settlement_timestamp: Option<f64>,
    pub settled_transactions: usize,
    pub blocks_observed: usize,
    pub failed_queries: usize,
    /// Set when some query, generation or submission failed during the run.
    pub partial: bool,
    pub blocks: Vec<BlockObservation>,
}

impl AggregateStats {
    pub fn compute(
        report: PollReport,
        elapsed: Duration,
        settlements: &HashMap<TxHash, u64>,
        submissions: &HashMap<TxHash, f64>,
    ) -> Self {
        let latency = average_latency(settlements, submissions);
        Self {
            total_transactions_observed: report.total_transactions,
            measurement_duration_seconds: elapsed.as_secs_f64(),
            tps: throughput(report.total_transactions, elapsed),
            average_latency_seconds: latency.map(|(mean, _)| mean),
            latency_samples: latency.map_or(0, |(_, samples)| samples),
            mean_settlement_timestamp: mean_settlement_timestamp(settlements),
            settled_transactions: settlements.len(),
            blocks_observed: report.blocks.len(),
            failed_queries: report.failed_queries,
            partial: report.failed_queries > 0,
            blocks: report.blocks,
        }
    }

    pub fn mark_partial(&mut self) {
        self.partial = true;
    }

    pub fn has_data(&self) -> bool {
        self.total_transactions_observed > 0
    }
}

/// A running measurement started by [`BenchmarkAggregator::start_measurement`].
#[derive(Debug)]
pub struct MeasurementHandle {
    started: Instant,
    cancel: CancellationToken,
    task: JoinHandle<PollReport>,
}

impl MeasurementHandle {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `true` once the poller has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Owns the settlement index and submission log of a run and turns a poller's observations
/// into [`AggregateStats`].
#[derive(Debug)]
pub struct BenchmarkAggregator<E> {
    endpoint: Arc<E>,
    config: PollerConfig,
    start_after: Option<BlockNumber>,
    settlements: Arc<SettlementIndex>,
    submissions: Arc<SubmissionLog>,
}

impl<E: ChainEndpoint> BenchmarkAggregator<E> {
    pub fn new(endpoint: Arc<E>, config: PollerConfig) -> Self {
        Self {
            endpoint,
            config,
            start_after: None,
            settlements: Arc::default(),
            submissions: Arc::default(),
        }
    }

    /// Ignores `block` and everything before it.
    pub fn starting_after(mut self, block: BlockNumber) -> Self {
        self.start_after = Some(block);
        self
    }

    pub fn settlements(&self) -> &Arc<SettlementIndex> {
        &self.settlements
    }

    /// Where submitters record when each transaction was sent.
    pub fn submissions(&self) -> &Arc<SubmissionLog> {
        &self.submissions
    }

    /// Spawns the poller and starts the wall clock.
    pub fn start_measurement(&self) -> MeasurementHandle {
        let cancel = CancellationToken::new();
        let mut poller =
            ChainPoller::new(self.endpoint.clone(), self.config, self.settlements.clone());
        if let Some(block) = self.start_after {
            poller = poller.starting_after(block);
        }

        MeasurementHandle {
            started: Instant::now(),
            task: tokio::spawn(poller.run(cancel.clone())),
            cancel,
        }
    }

    /// Stops the poller, waits for it to exit, then computes the statistics.
    pub async fn stop_and_collect(&self, handle: MeasurementHandle) -> AggregateStats {
        let MeasurementHandle {
            started,
            cancel,
            task,
        } = handle;
        cancel.cancel();
        let elapsed = started.elapsed();

        let (report, interrupted) = match task.await {
            Ok(report) => (report, false),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                error!(%err, "Poller task did not complete");
                (PollReport::default(), true)
            }
        };

        let mut stats = AggregateStats::compute(
            report,
            elapsed,
            &self.settlements.snapshot(),
            &self.submissions.snapshot(),
        );
        if interrupted {
            stats.mark_partial();
        }

        info!(
            transactions = stats.total_transactions_observed,
            duration = stats.measurement_duration_seconds,
            tps = stats.tps,
            latency = ?stats.average_latency_seconds,
            samples = stats.latency_samples,
            partial = stats.partial,
            "Measurement complete"
        );
        if let Some(mean) = stats.mean_settlement_timestamp {
            info!(
                mean_settlement_timestamp = mean,
                "Mean of absolute block timestamps, which is not a latency"
            );
        }
        stats
    }

    /// Measures until `stop` resolves.
    pub async fn run_until(&self, stop: impl Future<Output = ()>) -> AggregateStats {
        let handle = self.start_measurement();
        stop.await;
        self.stop_and_collect(handle).await
    }

    /// Measures for `duration`.
    pub async fn run_measurement(&self, duration: Duration) -> AggregateStats {
        self.run_until(tokio::time::sleep(duration)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::SignedTransfer,
        submit::Submitter,
        test_utils::{MockEndpoint, tx_hash},
        workload::{GeneratorSettings, WorkloadConfig, WorkloadGenerator},
    };
    use alloy::primitives::B256;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn tps_is_transactions_over_elapsed_seconds() {
        assert!(close(throughput(12, Duration::from_secs(4)), 3.0));
        assert!(close(throughput(0, Duration::from_secs(4)), 0.0));
        assert!(close(throughput(12, Duration::ZERO), 0.0));
    }

    #[test]
    fn latency_is_settlement_minus_submission() {
        let (a, b, c, d) = (
            B256::with_last_byte(1),
            B256::with_last_byte(2),
            B256::with_last_byte(3),
            B256::with_last_byte(4),
        );
        let settlements = HashMap::from([(a, 1_003), (b, 1_004), (c, 1_010)]);
        // `c` was never submitted by us, `d` never settled.
        let submissions = HashMap::from([(a, 1_000.5), (b, 1_001.0), (d, 1_002.0)]);

        let (mean, samples) = average_latency(&settlements, &submissions).unwrap();
        assert!(close(mean, 2.75));
        assert_eq!(samples, 2);
    }

    #[test]
    fn same_second_settlement_counts_as_zero_latency() {
        let hash = B256::with_last_byte(9);
        let settlements = HashMap::from([(hash, 1_000)]);
        let submissions = HashMap::from([(hash, 1_000.4)]);

        assert_eq!(average_latency(&settlements, &submissions), Some((0.0, 1)));
    }

    #[test]
    fn no_transactions_means_no_latency() {
        assert_eq!(average_latency(&HashMap::new(), &HashMap::new()), None);
        assert_eq!(mean_settlement_timestamp(&HashMap::new()), None);

        let stats = AggregateStats::compute(
            PollReport::default(),
            Duration::from_secs(30),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(!stats.has_data());
        assert_eq!(stats.tps, 0.0);
        assert_eq!(stats.average_latency_seconds, None);
        assert!(!stats.partial);
    }

    #[test]
    fn legacy_figure_is_the_mean_block_timestamp() {
        let settlements = HashMap::from([
            (B256::with_last_byte(1), 1_700_000_000),
            (B256::with_last_byte(2), 1_700_000_006),
        ]);
        assert_eq!(
            mean_settlement_timestamp(&settlements),
            Some(1_700_000_003.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn measurement_over_three_blocks() {
        let endpoint = MockEndpoint::new()
            .with_block(1, 5, 1_000)
            .with_block(2, 0, 1_006)
            .with_block(3, 7, 1_012)
            .with_heads([Some(1), Some(2), Some(3)]);
        let aggregator = BenchmarkAggregator::new(Arc::new(endpoint), PollerConfig::default());
        aggregator
            .submissions()
            .record(tx_hash(1, 0), UNIX_EPOCH + Duration::from_secs(998));
        aggregator
            .submissions()
            .record(tx_hash(3, 6), UNIX_EPOCH + Duration::from_secs(1_008));

        let stats = aggregator.run_measurement(Duration::from_secs(10)).await;

        assert_eq!(stats.total_transactions_observed, 12);
        assert_eq!(stats.blocks_observed, 3);
        assert_eq!(stats.settled_transactions, 12);
        assert!(close(stats.measurement_duration_seconds, 10.0));
        assert!(close(stats.tps, 1.2));
        assert_eq!(stats.latency_samples, 2);
        assert!(close(stats.average_latency_seconds.unwrap(), 3.0));
        assert!(!stats.partial);
    }

    #[tokio::test(start_paused = true)]
    async fn sent_transactions_yield_latency_samples() -> eyre::Result<()> {
        let generated =
            WorkloadGenerator::init(Arc::new(MockEndpoint::new()), GeneratorSettings::default())
                .await?
                .generate(&WorkloadConfig::new(1, 1, 3))
                .await?;
        let hashes = generated
            .transactions()
            .map(SignedTransfer::hash)
            .collect::<Vec<_>>();
        let settled_at = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() + 2;
        let endpoint = Arc::new(
            MockEndpoint::new()
                .with_block_txs(1, hashes, settled_at)
                .with_heads([Some(0), Some(1)]),
        );
        let aggregator =
            BenchmarkAggregator::new(endpoint.clone(), PollerConfig::default()).starting_after(0);

        let handle = aggregator.start_measurement();
        let summary = Submitter::new(
            endpoint.clone(),
            aggregator.submissions().clone(),
            Duration::from_secs(1),
        )
        .submit_workloads(&generated)
        .await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        let stats = aggregator.stop_and_collect(handle).await;

        assert_eq!(summary.sent, 3);
        assert_eq!(stats.total_transactions_observed, 3);
        assert_eq!(stats.latency_samples, 3);
        let latency = stats.average_latency_seconds.unwrap();
        assert!(latency > 0.0 && latency <= 2.0, "latency {latency}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_prompt_and_final() {
        let config = PollerConfig::default();
        let endpoint = Arc::new(MockEndpoint::new().hanging_heads());
        let aggregator = BenchmarkAggregator::new(endpoint.clone(), config);

        let handle = aggregator.start_measurement();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!handle.is_finished());

        let stopped_at = Instant::now();
        let stats = aggregator.stop_and_collect(handle).await;
        assert!(stopped_at.elapsed() <= config.interval * 2);
        assert_eq!(stats.total_transactions_observed, 0);

        let queries = endpoint.head_queries();
        let settled = aggregator.settlements().len();
        tokio::time::sleep(config.interval * 10).await;
        assert_eq!(endpoint.head_queries(), queries);
        assert_eq!(aggregator.settlements().len(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_interval_wait() {
        let config = PollerConfig::default();
        let endpoint = Arc::new(MockEndpoint::new().with_block(1, 3, 0).with_heads([Some(1)]));
        let aggregator = BenchmarkAggregator::new(endpoint.clone(), config);

        let handle = aggregator.start_measurement();
        // First poll completes at t=0; the poller then sleeps until t=3.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stopped_at = Instant::now();
        let stats = aggregator.stop_and_collect(handle).await;

        assert!(stopped_at.elapsed() < config.interval);
        assert_eq!(stats.total_transactions_observed, 3);
        assert_eq!(endpoint.head_queries(), 1);
        tokio::time::sleep(config.interval * 5).await;
        assert_eq!(aggregator.settlements().len(), 3);
        assert_eq!(endpoint.head_queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_degrade_to_partial_stats() {
        let endpoint = MockEndpoint::new().unreachable();
        let aggregator = BenchmarkAggregator::new(Arc::new(endpoint), PollerConfig::default());

        let stats = aggregator.run_measurement(Duration::from_secs(7)).await;

        assert_eq!(stats.total_transactions_observed, 0);
        assert_eq!(stats.failed_queries, 3);
        assert!(stats.partial);
        assert_eq!(stats.average_latency_seconds, None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_stops_on_external_signal() {
        let endpoint = MockEndpoint::new().with_block(1, 2, 0).with_heads([Some(1)]);
        let aggregator = BenchmarkAggregator::new(Arc::new(endpoint), PollerConfig::default());
        let stop = CancellationToken::new();

        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });
        let stats = aggregator.run_until(stop.cancelled_owned()).await;

        assert!(close(stats.measurement_duration_seconds, 2.0));
        assert!(close(stats.tps, 1.0));
    }
}
