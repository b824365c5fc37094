//! The network capability the generator and the poller run against.
//!
//! [`ChainEndpoint`] is the only way the rest of the crate talks to a chain. [`RpcEndpoint`]
//! implements it over JSON-RPC with an alloy [`Provider`]; tests use an in-memory double.

use crate::{
    error::{BenchError, EndpointError, Result},
    factory::SignedTransfer,
};
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, BlockNumber, TxHash},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::Block,
    transports::http::reqwest::Url,
};
use std::{future::Future, time::Duration};

pub type EndpointResult<T> = std::result::Result<T, EndpointError>;

/// Header fields of a block that the benchmark cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainHead {
    pub number: BlockNumber,
    pub hash: B256,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
}

/// A block together with the hashes of the transactions it includes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainBlock {
    pub head: ChainHead,
    pub transactions: Vec<TxHash>,
}

#[async_trait::async_trait]
pub trait ChainEndpoint: Send + Sync + 'static {
    /// Returns the current chain head.
    async fn current_head(&self) -> EndpointResult<ChainHead>;

    /// Returns the block at `number` with its transaction hashes.
    async fn block_by_number(&self, number: BlockNumber) -> EndpointResult<ChainBlock>;

    /// Returns the sequence number (nonce) of `address` including pending transactions.
    async fn pending_sequence_number(&self, address: Address) -> EndpointResult<u64>;

    /// Returns the suggested gas price, used as the base fee of dynamic-fee transactions.
    async fn suggest_gas_price(&self) -> EndpointResult<u128>;

    /// Returns the suggested priority fee per gas.
    async fn suggest_priority_fee(&self) -> EndpointResult<u128>;

    async fn chain_id(&self) -> EndpointResult<u64>;

    /// Broadcasts an already signed transaction and returns the hash the node reported.
    async fn submit(&self, tx: &SignedTransfer) -> EndpointResult<TxHash>;
}

/// Runs an endpoint call under `deadline`, tagging any failure with the name of the call.
pub async fn query<T, F>(method: &'static str, deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = EndpointResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(|err| BenchError::query(method, err)),
        Err(_) => Err(BenchError::query(method, EndpointError::Timeout(deadline))),
    }
}

/// [`ChainEndpoint`] backed by an alloy provider.
#[derive(Clone, Debug)]
pub struct RpcEndpoint<P> {
    provider: P,
}

impl<P> RpcEndpoint<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl RpcEndpoint<DynProvider> {
    /// Connects to a node over HTTP.
    pub fn connect_http(url: Url) -> Self {
        Self::new(ProviderBuilder::new().connect_http(url).erased())
    }
}

#[async_trait::async_trait]
impl<P> ChainEndpoint for RpcEndpoint<P>
where
    P: Provider + Send + Sync + 'static,
{
    async fn current_head(&self) -> EndpointResult<ChainHead> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or(EndpointError::MissingBlock(BlockNumberOrTag::Latest))?;
        Ok(into_chain_block(block).head)
    }

    async fn block_by_number(&self, number: BlockNumber) -> EndpointResult<ChainBlock> {
        let block = self
            .provider
            .get_block_by_number(number.into())
            .await?
            .ok_or(EndpointError::MissingBlock(number.into()))?;
        Ok(into_chain_block(block))
    }

    async fn pending_sequence_number(&self, address: Address) -> EndpointResult<u64> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    async fn suggest_gas_price(&self) -> EndpointResult<u128> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn suggest_priority_fee(&self) -> EndpointResult<u128> {
        Ok(self.provider.get_max_priority_fee_per_gas().await?)
    }

    async fn chain_id(&self) -> EndpointResult<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn submit(&self, tx: &SignedTransfer) -> EndpointResult<TxHash> {
        let pending = self.provider.send_raw_transaction(tx.encoded()).await?;
        Ok(*pending.tx_hash())
    }
}

fn into_chain_block(block: Block) -> ChainBlock {
    ChainBlock {
        head: ChainHead {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        },
        transactions: block.transactions.hashes().collect(),
    }
}
