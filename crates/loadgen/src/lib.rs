//! Load generation and throughput measurement for EVM layer-2 networks.
//!
//! A run pre-builds signed value transfers over a grid of workers and threads
//! ([`WorkloadGenerator`]), sends them ([`Submitter`]) and meanwhile watches the chain head
//! ([`ChainPoller`]) to count settled transactions. [`BenchmarkAggregator`] turns what the poller
//! saw into transactions per second and settlement latency.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod account;
pub mod aggregator;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod poller;
pub mod sequence;
pub mod submit;
pub mod workload;

#[cfg(test)]
mod test_utils;

pub use account::AccountPool;
pub use aggregator::{AggregateStats, BenchmarkAggregator, MeasurementHandle};
pub use endpoint::{ChainEndpoint, RpcEndpoint};
pub use error::{BenchError, EndpointError, Result};
pub use factory::{FeeModel, FeeParams, SignedTransfer, TransactionFactory, TransferValue};
pub use poller::{ChainPoller, PollReport, PollerConfig};
pub use sequence::SequenceTracker;
pub use submit::{DirectTransfer, SubmissionSummary, Submitter};
pub use workload::{
    GeneratedWorkload, GeneratorSettings, Workload, WorkloadConfig, WorkloadGenerator,
};
