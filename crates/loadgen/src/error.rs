use alloy::{eips::BlockNumberOrTag, transports::TransportError};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single call against a [`ChainEndpoint`](crate::endpoint::ChainEndpoint).
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("block {0} is not available")]
    MissingBlock(BlockNumberOrTag),
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("endpoint query `{method}` failed: {source}")]
    EndpointQuery {
        method: &'static str,
        #[source]
        source: EndpointError,
    },

    #[error("failed to sign transaction: {0}")]
    Signing(#[from] alloy::signers::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl BenchError {
    pub(crate) fn query(method: &'static str, source: EndpointError) -> Self {
        Self::EndpointQuery { method, source }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
