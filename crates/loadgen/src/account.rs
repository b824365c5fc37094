use crate::error::{BenchError, Result};
use alloy::{
    primitives::{Address, address},
    signers::local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English},
};
use rayon::prelude::*;
use std::{sync::Arc, time::Instant};
use tracing::info;

/// Pre-funded key of the default development account.
pub const DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Mnemonic the development accounts are derived from.
pub const DEV_MNEMONIC: &str = "test test test test test test test test test test test junk";

/// Recipient used when no other recipient is configured.
pub const DEV_RECIPIENT: Address = address!("0x3fad7Aa56bb74985cE1b98e1f6d26fF7f7c28dF3");

/// The identities transactions are sent from.
///
/// Worker threads are mapped onto the pool round-robin, so a pool of one account reproduces a
/// single sender shared by every thread.
#[derive(Clone, Debug)]
pub struct AccountPool {
    signers: Arc<[PrivateKeySigner]>,
}

impl AccountPool {
    pub fn new(signers: Vec<PrivateKeySigner>) -> Result<Self> {
        if signers.is_empty() {
            return Err(BenchError::Configuration(
                "account pool needs at least one signer".to_string(),
            ));
        }
        Ok(Self {
            signers: signers.into(),
        })
    }

    /// A pool holding only the default development account.
    pub fn dev() -> Self {
        let signer = DEV_PRIVATE_KEY
            .parse::<PrivateKeySigner>()
            .expect("dev key is a valid secp256k1 scalar");
        Self {
            signers: vec![signer].into(),
        }
    }

    pub fn from_private_keys<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let signers = keys
            .into_iter()
            .map(|key| {
                key.as_ref().trim().parse::<PrivateKeySigner>().map_err(|err| {
                    BenchError::Configuration(format!("invalid private key: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(signers)
    }

    /// Derives `count` accounts from `phrase`, starting at derivation index `from_index`.
    pub fn from_mnemonic(phrase: &str, from_index: u32, count: u32) -> Result<Self> {
        let start = Instant::now();
        let end = from_index.checked_add(count).ok_or_else(|| {
            BenchError::Configuration("mnemonic index range overflows".to_string())
        })?;

        let signers = (from_index..end)
            .into_par_iter()
            .map(|index| {
                MnemonicBuilder::<English>::default()
                    .phrase(phrase)
                    .index(index)
                    .and_then(|builder| builder.build())
                    .map_err(|err| BenchError::Configuration(format!("invalid mnemonic: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(count, elapsed = ?start.elapsed(), "Derived accounts from mnemonic");
        Self::new(signers)
    }

    /// The signer used by thread `thread` of worker `worker`.
    pub fn for_thread(
        &self,
        worker: usize,
        thread: usize,
        threads_per_worker: usize,
    ) -> &PrivateKeySigner {
        &self.signers[(worker * threads_per_worker + thread) % self.signers.len()]
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.signers.iter().map(|signer| signer.address())
    }
}

impl Default for AccountPool {
    fn default() -> Self {
        Self::dev()
    }
}
