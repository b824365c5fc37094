//! In-memory [`ChainEndpoint`] for unit tests.

use crate::{
    endpoint::{ChainBlock, ChainEndpoint, ChainHead, EndpointResult},
    error::EndpointError,
    factory::SignedTransfer,
};
use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, BlockNumber, TxHash, U256},
    transports::TransportErrorKind,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

pub(crate) const CHAIN_ID: u64 = 901;
pub(crate) const GAS_PRICE: u128 = 1_000_000_000;
pub(crate) const PRIORITY_FEE: u128 = 1_000_000;

fn rpc_failure(what: &str) -> EndpointError {
    EndpointError::Transport(TransportErrorKind::custom_str(what))
}

/// Deterministic, distinct transaction hash for the `index`th transaction of block `number`.
pub(crate) fn tx_hash(number: BlockNumber, index: usize) -> TxHash {
    B256::from(U256::from((number << 32) | index as u64))
}

#[derive(Debug, Default)]
pub(crate) struct MockEndpoint {
    nonces: Mutex<HashMap<Address, u64>>,
    failing_nonces: Mutex<HashSet<Address>>,
    nonce_queries: AtomicUsize,
    /// Scripted answers to `current_head`; `None` is an RPC failure.
    heads: Mutex<VecDeque<Option<BlockNumber>>>,
    last_head: Mutex<Option<BlockNumber>>,
    head_queries: AtomicUsize,
    hang_heads: AtomicBool,
    blocks: Mutex<HashMap<BlockNumber, ChainBlock>>,
    failing_blocks: Mutex<HashMap<BlockNumber, usize>>,
    block_queries: Mutex<Vec<BlockNumber>>,
    failing_submissions: AtomicUsize,
    submitted: Mutex<Vec<TxHash>>,
    unreachable: AtomicBool,
}

impl MockEndpoint {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_nonce(self, address: Address, nonce: u64) -> Self {
        self.nonces.lock().insert(address, nonce);
        self
    }

    pub(crate) fn failing_nonce(self, address: Address) -> Self {
        self.failing_nonces.lock().insert(address);
        self
    }

    /// Adds block `number` holding `tx_count` transactions mined at `timestamp`.
    pub(crate) fn with_block(self, number: BlockNumber, tx_count: usize, timestamp: u64) -> Self {
        let block = ChainBlock {
            head: ChainHead {
                number,
                hash: B256::with_last_byte(number as u8),
                timestamp,
            },
            transactions: (0..tx_count).map(|index| tx_hash(number, index)).collect(),
        };
        self.blocks.lock().insert(number, block);
        self
    }

    /// Adds block `number` holding exactly `transactions`.
    pub(crate) fn with_block_txs(
        self,
        number: BlockNumber,
        transactions: Vec<TxHash>,
        timestamp: u64,
    ) -> Self {
        let block = ChainBlock {
            head: ChainHead {
                number,
                hash: B256::with_last_byte(number as u8),
                timestamp,
            },
            transactions,
        };
        self.blocks.lock().insert(number, block);
        self
    }

    /// Scripts successive `current_head` answers. Once exhausted the last good head repeats.
    pub(crate) fn with_heads(self, heads: impl IntoIterator<Item = Option<BlockNumber>>) -> Self {
        self.heads.lock().extend(heads);
        self
    }

    pub(crate) fn failing_block(self, number: BlockNumber, times: usize) -> Self {
        self.failing_blocks.lock().insert(number, times);
        self
    }

    pub(crate) fn failing_submissions(self, count: usize) -> Self {
        self.failing_submissions.store(count, Ordering::SeqCst);
        self
    }

    /// Every `current_head` call never resolves.
    pub(crate) fn hanging_heads(self) -> Self {
        self.hang_heads.store(true, Ordering::SeqCst);
        self
    }

    /// Every call fails, as if the node could not be reached.
    pub(crate) fn unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn nonce_queries(&self) -> usize {
        self.nonce_queries.load(Ordering::SeqCst)
    }

    pub(crate) fn head_queries(&self) -> usize {
        self.head_queries.load(Ordering::SeqCst)
    }

    pub(crate) fn block_queries(&self) -> Vec<BlockNumber> {
        self.block_queries.lock().clone()
    }

    pub(crate) fn submitted(&self) -> Vec<TxHash> {
        self.submitted.lock().clone()
    }

    fn check_reachable(&self) -> EndpointResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(rpc_failure("connection refused"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainEndpoint for MockEndpoint {
    async fn current_head(&self) -> EndpointResult<ChainHead> {
        self.check_reachable()?;
        self.head_queries.fetch_add(1, Ordering::SeqCst);
        if self.hang_heads.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let number = match self.heads.lock().pop_front() {
            Some(Some(number)) => number,
            Some(None) => return Err(rpc_failure("header unavailable")),
            None => self
                .last_head
                .lock()
                .ok_or_else(|| rpc_failure("no head scripted"))?,
        };
        *self.last_head.lock() = Some(number);

        Ok(self
            .blocks
            .lock()
            .get(&number)
            .map(|block| block.head)
            .unwrap_or(ChainHead {
                number,
                hash: B256::ZERO,
                timestamp: 0,
            }))
    }

    async fn block_by_number(&self, number: BlockNumber) -> EndpointResult<ChainBlock> {
        self.check_reachable()?;
        self.block_queries.lock().push(number);
        if let Some(remaining) = self.failing_blocks.lock().get_mut(&number)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(rpc_failure("block unavailable"));
        }
        self.blocks
            .lock()
            .get(&number)
            .cloned()
            .ok_or(EndpointError::MissingBlock(BlockNumberOrTag::Number(number)))
    }

    async fn pending_sequence_number(&self, address: Address) -> EndpointResult<u64> {
        self.check_reachable()?;
        self.nonce_queries.fetch_add(1, Ordering::SeqCst);
        if self.failing_nonces.lock().contains(&address) {
            return Err(rpc_failure("nonce unavailable"));
        }
        Ok(self.nonces.lock().get(&address).copied().unwrap_or_default())
    }

    async fn suggest_gas_price(&self) -> EndpointResult<u128> {
        self.check_reachable()?;
        Ok(GAS_PRICE)
    }

    async fn suggest_priority_fee(&self) -> EndpointResult<u128> {
        self.check_reachable()?;
        Ok(PRIORITY_FEE)
    }

    async fn chain_id(&self) -> EndpointResult<u64> {
        self.check_reachable()?;
        Ok(CHAIN_ID)
    }

    async fn submit(&self, tx: &SignedTransfer) -> EndpointResult<TxHash> {
        self.check_reachable()?;
        let failing = self
            .failing_submissions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(rpc_failure("nonce too low"));
        }
        self.submitted.lock().push(tx.hash());
        Ok(tx.hash())
    }
}
