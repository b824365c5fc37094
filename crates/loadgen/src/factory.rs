use crate::{
    endpoint::{ChainEndpoint, query},
    error::Result,
};
use alloy::{
    consensus::{SignableTransaction, Transaction as _, TxEip1559, TxEnvelope, TxLegacy},
    eips::Encodable2718,
    network::TxSignerSync,
    primitives::{Address, Bytes, TxHash, TxKind, U256},
    signers::local::PrivateKeySigner,
};
use serde::Serialize;
use std::time::Duration;

/// Gas used by a plain value transfer to an externally owned account.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Gas limit for one-off transfers where the recipient may run code on receipt.
pub const CONSERVATIVE_TRANSFER_GAS_LIMIT: u64 = 25_000;

/// Exclusive upper bound, in wei, of randomly drawn transfer values.
pub const RANDOM_VALUE_CEILING: u64 = 1_000;

/// 1 ether in wei.
pub const ONE_ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// How transactions price their gas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeModel {
    /// A single gas price.
    Legacy,
    /// EIP-1559 max fee and priority fee.
    #[default]
    Eip1559,
}

/// A fee snapshot shared by every transaction of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeParams {
    pub fn legacy(gas_price: u128) -> Self {
        Self::Legacy { gas_price }
    }

    /// Dynamic fees with `max_fee = base_fee + priority_fee`, never below `base_fee`.
    pub fn eip1559(base_fee: u128, priority_fee: u128) -> Self {
        Self::Eip1559 {
            max_fee_per_gas: base_fee.saturating_add(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        }
    }

    /// Takes a fee snapshot from the endpoint's suggestions.
    pub async fn suggest<E: ChainEndpoint>(
        endpoint: &E,
        model: FeeModel,
        request_timeout: Duration,
    ) -> Result<Self> {
        let gas_price =
            query("eth_gasPrice", request_timeout, endpoint.suggest_gas_price()).await?;
        match model {
            FeeModel::Legacy => Ok(Self::legacy(gas_price)),
            FeeModel::Eip1559 => {
                let priority_fee = query(
                    "eth_maxPriorityFeePerGas",
                    request_timeout,
                    endpoint.suggest_priority_fee(),
                )
                .await?;
                Ok(Self::eip1559(gas_price, priority_fee))
            }
        }
    }

    pub fn model(&self) -> FeeModel {
        match self {
            Self::Legacy { .. } => FeeModel::Legacy,
            Self::Eip1559 { .. } => FeeModel::Eip1559,
        }
    }
}

/// Amount moved by each transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferValue {
    /// Uniformly drawn from `[0, ceiling)` wei.
    Random { ceiling: u64 },
    Fixed(U256),
}

impl TransferValue {
    pub fn sample(&self) -> U256 {
        match *self {
            Self::Random { ceiling } if ceiling > 0 => U256::from(rand::random_range(0..ceiling)),
            Self::Random { .. } => U256::ZERO,
            Self::Fixed(value) => value,
        }
    }
}

impl Default for TransferValue {
    fn default() -> Self {
        Self::Random {
            ceiling: RANDOM_VALUE_CEILING,
        }
    }
}

/// A signed, EIP-2718 encoded transaction ready for `eth_sendRawTransaction`.
#[derive(Clone, Debug)]
pub struct SignedTransfer {
    envelope: TxEnvelope,
    encoded: Bytes,
    sender: Address,
}

impl SignedTransfer {
    pub fn hash(&self) -> TxHash {
        *self.envelope.tx_hash()
    }

    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn nonce(&self) -> u64 {
        self.envelope.nonce()
    }

    pub fn envelope(&self) -> &TxEnvelope {
        &self.envelope
    }
}

/// Builds and signs value transfers for one chain with one fee snapshot.
#[derive(Clone, Copy, Debug)]
pub struct TransactionFactory {
    chain_id: u64,
    fee: FeeParams,
    gas_limit: u64,
}

impl TransactionFactory {
    pub fn new(chain_id: u64, fee: FeeParams) -> Self {
        Self {
            chain_id,
            fee,
            gas_limit: TRANSFER_GAS_LIMIT,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn fee(&self) -> FeeParams {
        self.fee
    }

    /// Signs a transfer of `value` from `sender` to `recipient` at sequence number `nonce`.
    pub fn build(
        &self,
        sender: &PrivateKeySigner,
        recipient: Address,
        value: U256,
        nonce: u64,
    ) -> Result<SignedTransfer> {
        let envelope: TxEnvelope = match self.fee {
            FeeParams::Legacy { gas_price } => {
                let mut tx = TxLegacy {
                    chain_id: Some(self.chain_id),
                    nonce,
                    gas_price,
                    gas_limit: self.gas_limit,
                    to: TxKind::Call(recipient),
                    value,
                    ..Default::default()
                };
                let signature = sender.sign_transaction_sync(&mut tx)?;
                tx.into_signed(signature).into()
            }
            FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut tx = TxEip1559 {
                    chain_id: self.chain_id,
                    nonce,
                    gas_limit: self.gas_limit,
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                    to: TxKind::Call(recipient),
                    value,
                    ..Default::default()
                };
                let signature = sender.sign_transaction_sync(&mut tx)?;
                tx.into_signed(signature).into()
            }
        };

        Ok(SignedTransfer {
            encoded: envelope.encoded_2718().into(),
            envelope,
            sender: sender.address(),
        })
    }
}
