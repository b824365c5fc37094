//! Pre-generation of signed transfer batches over a worker/thread grid.

use crate::{
    account::{AccountPool, DEV_RECIPIENT},
    endpoint::{ChainEndpoint, query},
    error::{BenchError, Result},
    factory::{
        FeeModel, FeeParams, SignedTransfer, TRANSFER_GAS_LIMIT, TransactionFactory, TransferValue,
    },
    sequence::SequenceTracker,
};
use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Shape of a generated workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub worker_count: usize,
    pub threads_per_worker: usize,
    pub total_transaction_count: usize,
    /// Hand the transactions lost to floor division out to the first threads, one each.
    #[serde(default)]
    pub distribute_remainder: bool,
}

impl WorkloadConfig {
    pub fn new(
        worker_count: usize,
        threads_per_worker: usize,
        total_transaction_count: usize,
    ) -> Self {
        Self {
            worker_count,
            threads_per_worker,
            total_transaction_count,
            distribute_remainder: false,
        }
    }

    pub fn with_distributed_remainder(mut self) -> Self {
        self.distribute_remainder = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(BenchError::Configuration(
                "worker count must be positive".to_string(),
            ));
        }
        if self.threads_per_worker == 0 {
            return Err(BenchError::Configuration(
                "threads per worker must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.worker_count * self.threads_per_worker
    }

    /// `total / workers / threads`, rounded down.
    pub fn transactions_per_thread(&self) -> usize {
        self.total_transaction_count / self.worker_count / self.threads_per_worker
    }

    /// Number of transactions thread `thread` of worker `worker` builds.
    pub fn thread_transaction_count(&self, worker: usize, thread: usize) -> usize {
        let base = self.transactions_per_thread();
        if !self.distribute_remainder {
            return base;
        }
        let remainder = self.total_transaction_count - base * self.thread_count();
        base + usize::from(worker * self.threads_per_worker + thread < remainder)
    }

    /// Number of transactions a fully successful generation produces.
    pub fn planned_total(&self) -> usize {
        if self.distribute_remainder {
            self.total_transaction_count
        } else {
            self.transactions_per_thread() * self.thread_count()
        }
    }
}

/// The transactions of one worker, one list per thread.
#[derive(Clone, Debug)]
pub struct Workload {
    pub worker_id: usize,
    pub transaction_lists: Vec<Vec<SignedTransfer>>,
}

impl Workload {
    pub fn transaction_count(&self) -> usize {
        self.transaction_lists.iter().map(Vec::len).sum()
    }
}

/// A thread that stopped early. Its list keeps the transactions built before the failure.
#[derive(Debug)]
pub struct ThreadFailure {
    pub worker_id: usize,
    pub thread_id: usize,
    pub built: usize,
    pub error: BenchError,
}

#[derive(Debug, Default)]
pub struct GeneratedWorkload {
    /// One entry per worker, ordered by worker id.
    pub workloads: Vec<Workload>,
    pub failures: Vec<ThreadFailure>,
}

impl GeneratedWorkload {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn transaction_count(&self) -> usize {
        self.workloads.iter().map(Workload::transaction_count).sum()
    }

    pub fn transactions(&self) -> impl Iterator<Item = &SignedTransfer> {
        self.workloads
            .iter()
            .flat_map(|workload| workload.transaction_lists.iter().flatten())
    }
}

/// Everything about a run that stays fixed across its transactions.
#[derive(Clone, Debug)]
pub struct GeneratorSettings {
    pub accounts: AccountPool,
    pub recipient: Address,
    pub fee_model: FeeModel,
    pub value: TransferValue,
    pub gas_limit: u64,
    pub request_timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            accounts: AccountPool::dev(),
            recipient: DEV_RECIPIENT,
            fee_model: FeeModel::default(),
            value: TransferValue::default(),
            gas_limit: TRANSFER_GAS_LIMIT,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Builds signed transfer batches for a [`WorkloadConfig`].
///
/// Chain id and fees are snapshotted once by [`WorkloadGenerator::init`]; every transaction the
/// generator builds afterwards shares them. Sequence numbers persist across calls to
/// [`WorkloadGenerator::generate`].
#[derive(Debug)]
pub struct WorkloadGenerator<E>(Arc<GeneratorInner<E>>);

#[derive(Debug)]
struct GeneratorInner<E> {
    factory: TransactionFactory,
    accounts: AccountPool,
    recipient: Address,
    value: TransferValue,
    sequences: SequenceTracker<E>,
}

impl<E> Clone for WorkloadGenerator<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E: ChainEndpoint> WorkloadGenerator<E> {
    /// Connects the generator to `endpoint`, failing fast if the endpoint cannot serve the
    /// chain id or a fee suggestion.
    pub async fn init(endpoint: Arc<E>, settings: GeneratorSettings) -> Result<Self> {
        let GeneratorSettings {
            accounts,
            recipient,
            fee_model,
            value,
            gas_limit,
            request_timeout,
        } = settings;

        let chain_id = query("eth_chainId", request_timeout, endpoint.chain_id()).await?;
        let fee = FeeParams::suggest(endpoint.as_ref(), fee_model, request_timeout).await?;
        info!(chain_id, ?fee, accounts = accounts.len(), %recipient, "Workload generator ready");

        Ok(Self(Arc::new(GeneratorInner {
            factory: TransactionFactory::new(chain_id, fee).with_gas_limit(gas_limit),
            accounts,
            recipient,
            value,
            sequences: SequenceTracker::new(endpoint, request_timeout),
        })))
    }

    pub fn factory(&self) -> &TransactionFactory {
        &self.0.factory
    }

    pub fn sequences(&self) -> &SequenceTracker<E> {
        &self.0.sequences
    }

    pub fn accounts(&self) -> &AccountPool {
        &self.0.accounts
    }

    /// Builds `config.worker_count` workloads, one task per worker.
    ///
    /// A failing thread keeps what it built so far and is reported in
    /// [`GeneratedWorkload::failures`]; other threads and workers are unaffected.
    pub async fn generate(&self, config: &WorkloadConfig) -> Result<GeneratedWorkload> {
        config.validate()?;

        let start = Instant::now();
        info!(
            workers = config.worker_count,
            threads = config.threads_per_worker,
            per_thread = config.transactions_per_thread(),
            planned = config.planned_total(),
            requested = config.total_transaction_count,
            "Generating workload"
        );

        let mut tasks = JoinSet::new();
        for worker_id in 0..config.worker_count {
            let generator = self.clone();
            let config = *config;
            tasks.spawn(async move { generator.generate_worker(worker_id, &config).await });
        }

        let mut generated = GeneratedWorkload::default();
        while let Some(joined) = tasks.join_next().await {
            let (workload, failures) =
                joined.unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()));
            generated.workloads.push(workload);
            generated.failures.extend(failures);
        }
        generated.workloads.sort_by_key(|workload| workload.worker_id);
        generated
            .failures
            .sort_by_key(|failure| (failure.worker_id, failure.thread_id));

        info!(
            transactions = generated.transaction_count(),
            failed_threads = generated.failures.len(),
            elapsed = ?start.elapsed(),
            "Generated workload"
        );
        Ok(generated)
    }

    async fn generate_worker(
        &self,
        worker_id: usize,
        config: &WorkloadConfig,
    ) -> (Workload, Vec<ThreadFailure>) {
        let mut transaction_lists = Vec::with_capacity(config.threads_per_worker);
        let mut failures = Vec::new();

        for thread_id in 0..config.threads_per_worker {
            let signer = self
                .0
                .accounts
                .for_thread(worker_id, thread_id, config.threads_per_worker);
            let count = config.thread_transaction_count(worker_id, thread_id);

            let mut transactions = Vec::with_capacity(count);
            for _ in 0..count {
                match self.build_next(signer).await {
                    Ok(tx) => transactions.push(tx),
                    Err(error) => {
                        warn!(
                            worker_id,
                            thread_id,
                            built = transactions.len(),
                            %error,
                            "Thread aborted"
                        );
                        failures.push(ThreadFailure {
                            worker_id,
                            thread_id,
                            built: transactions.len(),
                            error,
                        });
                        break;
                    }
                }
            }
            debug!(
                worker_id,
                thread_id,
                sender = %signer.address(),
                built = transactions.len(),
                "Thread done"
            );
            transaction_lists.push(transactions);
        }

        (
            Workload {
                worker_id,
                transaction_lists,
            },
            failures,
        )
    }

    async fn build_next(&self, signer: &PrivateKeySigner) -> Result<SignedTransfer> {
        let nonce = self.0.sequences.next(signer.address()).await?;
        self.0
            .factory
            .build(signer, self.0.recipient, self.0.value.sample(), nonce)
    }
}
