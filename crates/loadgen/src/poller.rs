use crate::{
    aggregator::SettlementIndex,
    endpoint::{ChainBlock, ChainEndpoint, query},
};
use alloy::primitives::{B256, BlockNumber};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default wait between two polls, about half the nominal block time of the target chains.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default deadline of a single endpoint call made by the poller.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
    /// Also process the blocks skipped when the head advances by more than one between polls.
    pub backfill: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backfill: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockObservation {
    pub block_number: BlockNumber,
    pub block_hash: B256,
    pub transaction_count: usize,
    pub block_timestamp: u64,
}

/// What a poller saw between its start and its cancellation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PollReport {
    pub total_transactions: usize,
    pub blocks: Vec<BlockObservation>,
    pub failed_queries: usize,
    pub last_processed: Option<BlockNumber>,
}

/// Watches the chain head and tallies the transactions of every new block.
///
/// Settlement timestamps go to the shared [`SettlementIndex`]; everything else stays in the
/// poller's [`PollReport`], which is handed back once [`ChainPoller::run`] returns.
#[derive(Debug)]
pub struct ChainPoller<E> {
    endpoint: Arc<E>,
    config: PollerConfig,
    settlements: Arc<SettlementIndex>,
    report: PollReport,
}

impl<E: ChainEndpoint> ChainPoller<E> {
    pub fn new(endpoint: Arc<E>, config: PollerConfig, settlements: Arc<SettlementIndex>) -> Self {
        Self {
            endpoint,
            config,
            settlements,
            report: PollReport::default(),
        }
    }

    /// Treats `block` and everything before it as already processed.
    pub fn starting_after(mut self, block: BlockNumber) -> Self {
        self.report.last_processed = Some(block);
        self
    }

    /// Polls until `cancel` fires. In-flight queries and the interval wait are both abandoned on
    /// cancellation, so the loop exits within one interval.
    pub async fn run(mut self, cancel: CancellationToken) -> PollReport {
        info!(
            interval = ?self.config.interval,
            backfill = self.config.backfill,
            "Chain poller started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.poll_once() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!(
            blocks = self.report.blocks.len(),
            transactions = self.report.total_transactions,
            failed_queries = self.report.failed_queries,
            "Chain poller stopped"
        );
        self.report
    }

    async fn poll_once(&mut self) {
        let timeout = self.config.request_timeout;
        let head = match query("eth_getBlockByNumber", timeout, self.endpoint.current_head()).await
        {
            Ok(head) => head,
            Err(error) => {
                self.report.failed_queries += 1;
                warn!(%error, "Failed to fetch chain head");
                return;
            }
        };

        let first = match self.report.last_processed {
            Some(last) if head.number <= last => {
                debug!(head = head.number, "No new block");
                return;
            }
            Some(last) if self.config.backfill => last + 1,
            _ => head.number,
        };

        for number in first..=head.number {
            let block = self.endpoint.block_by_number(number);
            match query("eth_getBlockByNumber", timeout, block).await {
                Ok(block) => self.record(number, block),
                Err(error) => {
                    self.report.failed_queries += 1;
                    warn!(number, %error, "Failed to fetch block");
                    return;
                }
            }
        }
    }

    fn record(&mut self, number: BlockNumber, block: ChainBlock) {
        let observation = BlockObservation {
            block_number: number,
            block_hash: block.head.hash,
            transaction_count: block.transactions.len(),
            block_timestamp: block.head.timestamp,
        };
        info!(
            number,
            hash = %observation.block_hash,
            transactions = observation.transaction_count,
            "New block"
        );

        self.settlements
            .record(block.transactions, observation.block_timestamp);
        self.report.total_transactions += observation.transaction_count;
        self.report.last_processed = Some(number);
        self.report.blocks.push(observation);
    }
}
