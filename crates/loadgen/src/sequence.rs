use crate::{
    endpoint::{ChainEndpoint, query},
    error::Result,
};
use alloy::primitives::Address;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Allocates strictly increasing sequence numbers (nonces) per sender.
///
/// The first allocation for an address is seeded from the endpoint's pending nonce; every later
/// allocation is served from the local cache. Allocation is atomic per address, so concurrent
/// callers never receive the same number.
#[derive(Debug)]
pub struct SequenceTracker<E> {
    endpoint: Arc<E>,
    request_timeout: Duration,
    next: DashMap<Address, u64>,
}

impl<E: ChainEndpoint> SequenceTracker<E> {
    pub fn new(endpoint: Arc<E>, request_timeout: Duration) -> Self {
        Self {
            endpoint,
            request_timeout,
            next: DashMap::new(),
        }
    }

    /// Returns the sequence number to use for the next transaction from `address`.
    pub async fn next(&self, address: Address) -> Result<u64> {
        if let Some(nonce) = self.allocate_cached(address) {
            return Ok(nonce);
        }

        let pending = query(
            "eth_getTransactionCount",
            self.request_timeout,
            self.endpoint.pending_sequence_number(address),
        )
        .await?;
        debug!(%address, pending, "Seeded sequence number");

        // Another task may have seeded the address while we were waiting on the endpoint.
        let mut entry = self.next.entry(address).or_insert(pending);
        let nonce = *entry;
        *entry = nonce + 1;
        Ok(nonce)
    }

    /// The number the next allocation for `address` would return, if it has been seeded.
    pub fn peek(&self, address: Address) -> Option<u64> {
        self.next.get(&address).map(|entry| *entry)
    }

    fn allocate_cached(&self, address: Address) -> Option<u64> {
        let mut entry = self.next.get_mut(&address)?;
        let nonce = *entry;
        *entry = nonce + 1;
        Some(nonce)
    }
}
