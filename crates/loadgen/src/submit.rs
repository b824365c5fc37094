//! Broadcasting signed transfers.

use crate::{
    aggregator::SubmissionLog,
    endpoint::{ChainEndpoint, query},
    error::Result,
    factory::{
        CONSERVATIVE_TRANSFER_GAS_LIMIT, FeeParams, ONE_ETHER, SignedTransfer, TransactionFactory,
    },
    workload::GeneratedWorkload,
};
use alloy::{
    primitives::{Address, TxHash, U256},
    signers::local::PrivateKeySigner,
};
use futures::{StreamExt, stream::FuturesUnordered};
use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, warn};

/// Pause between two transfers of a [`DirectTransfer`] run.
pub const DIRECT_TRANSFER_PAUSE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Sends pre-generated workloads, one concurrent sender per thread list.
///
/// Each list is sent in order so that sequence numbers of a sender reach the node in increasing
/// order. Failed sends are logged and counted, never retried.
#[derive(Debug)]
pub struct Submitter<E> {
    endpoint: Arc<E>,
    request_timeout: Duration,
    log: Arc<SubmissionLog>,
    sent: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl<E: ChainEndpoint> Submitter<E> {
    pub fn new(endpoint: Arc<E>, log: Arc<SubmissionLog>, request_timeout: Duration) -> Self {
        Self {
            endpoint,
            request_timeout,
            log,
            sent: Arc::default(),
            failed: Arc::default(),
        }
    }

    /// Live count of accepted transactions, for progress reporting.
    pub fn sent_counter(&self) -> Arc<AtomicUsize> {
        self.sent.clone()
    }

    pub fn summary(&self) -> SubmissionSummary {
        SubmissionSummary {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn submit_workloads(&self, generated: &GeneratedWorkload) -> SubmissionSummary {
        let mut senders = generated
            .workloads
            .iter()
            .flat_map(|workload| workload.transaction_lists.iter())
            .filter(|list| !list.is_empty())
            .map(|list| self.submit_list(list))
            .collect::<FuturesUnordered<_>>();
        while senders.next().await.is_some() {}

        let summary = self.summary();
        info!(sent = summary.sent, failed = summary.failed, "Submission finished");
        summary
    }

    async fn submit_list(&self, transactions: &[SignedTransfer]) {
        for tx in transactions {
            self.log.record_now(tx.hash());
            match query(
                "eth_sendRawTransaction",
                self.request_timeout,
                self.endpoint.submit(tx),
            )
            .await
            {
                Ok(hash) => {
                    self.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(%hash, sender = %tx.sender(), nonce = tx.nonce(), "Sent transaction");
                }
                Err(error) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        hash = %tx.hash(),
                        nonce = tx.nonce(),
                        %error,
                        "Failed to send transaction"
                    );
                }
            }
        }
    }
}

/// Repeated one-ether legacy transfers from a single key, for smoke testing a node.
///
/// The sequence number is fetched once and then incremented locally, so this must be the only
/// sender using the key while it runs.
#[derive(Debug)]
pub struct DirectTransfer<E> {
    endpoint: Arc<E>,
    signer: PrivateKeySigner,
    recipient: Address,
    value: U256,
    pause: Duration,
    request_timeout: Duration,
}

impl<E: ChainEndpoint> DirectTransfer<E> {
    pub fn new(endpoint: Arc<E>, signer: PrivateKeySigner, recipient: Address) -> Self {
        Self {
            endpoint,
            signer,
            recipient,
            value: ONE_ETHER,
            pause: DIRECT_TRANSFER_PAUSE,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sends `iterations` transfers and returns their hashes. The first failure aborts the run.
    pub async fn run(&self, iterations: usize) -> Result<Vec<TxHash>> {
        let timeout = self.request_timeout;
        let sender = self.signer.address();

        let mut nonce = query(
            "eth_getTransactionCount",
            timeout,
            self.endpoint.pending_sequence_number(sender),
        )
        .await?;
        let chain_id = query("eth_chainId", timeout, self.endpoint.chain_id()).await?;
        info!(%sender, nonce, chain_id, iterations, "Starting direct transfers");

        let mut hashes = Vec::with_capacity(iterations);
        for iteration in 0..iterations {
            let gas_price =
                query("eth_gasPrice", timeout, self.endpoint.suggest_gas_price()).await?;
            let transfer = TransactionFactory::new(chain_id, FeeParams::legacy(gas_price))
                .with_gas_limit(CONSERVATIVE_TRANSFER_GAS_LIMIT)
                .build(&self.signer, self.recipient, self.value, nonce)?;

            let hash = query(
                "eth_sendRawTransaction",
                timeout,
                self.endpoint.submit(&transfer),
            )
            .await?;
            info!(iteration, nonce, %hash, "Sent transfer");

            hashes.push(hash);
            nonce += 1;
            if iteration + 1 < iterations {
                tokio::time::sleep(self.pause).await;
            }
        }
        Ok(hashes)
    }
}
