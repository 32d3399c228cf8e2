use std::sync::Arc;

use argus_core::types::{
    CurrencyPair,
    CurrencyPairId,
    Price,
    PriceBytesTooLong,
};
use async_trait::async_trait;
use sha2::{
    Digest as _,
    Sha256,
};

use crate::keepers::PairRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("unknown currency pair: {currency_pair}")]
    UnknownCurrencyPair { currency_pair: CurrencyPair },
    #[error("unknown currency pair id: {id}")]
    UnknownId { id: CurrencyPairId },
    #[error(transparent)]
    MalformedPrice(#[from] PriceBytesTooLong),
    #[error("negative price for {currency_pair} is not permitted")]
    NegativePrice { currency_pair: CurrencyPair },
    #[error("failed reading currency pair registry: {report}")]
    Registry { report: eyre::Report },
}

impl StrategyError {
    fn registry(report: eyre::Report) -> Self {
        Self::Registry {
            report,
        }
    }
}

/// Bidirectional mapping between currency pairs and their compact on-wire
/// IDs, plus the per-pair price encode/decode hooks.
///
/// Implementations resolve against the registry snapshot of the height the
/// surrounding handler executes for; the mapping must be deterministic
/// within a height.
#[async_trait]
pub trait CurrencyPairStrategy: Send + Sync {
    async fn id(&self, currency_pair: &CurrencyPair) -> Result<CurrencyPairId, StrategyError>;

    async fn from_id(&self, id: CurrencyPairId) -> Result<CurrencyPair, StrategyError>;

    /// Upper bound on the number of prices a well-formed vote extension can
    /// carry at the current height.
    async fn max_num_currency_pairs(&self) -> Result<u64, StrategyError>;

    async fn encoded_price(
        &self,
        currency_pair: &CurrencyPair,
        price: &Price,
    ) -> Result<Vec<u8>, StrategyError>;

    async fn decoded_price(
        &self,
        currency_pair: &CurrencyPair,
        bytes: &[u8],
    ) -> Result<Price, StrategyError>;
}

// Shared price hooks: big-endian two's-complement bytes, with negative
// prices rejected in both directions (oracle quotes are non-negative).
fn encode_price(currency_pair: &CurrencyPair, price: &Price) -> Result<Vec<u8>, StrategyError> {
    if price.is_negative() {
        return Err(StrategyError::NegativePrice {
            currency_pair: currency_pair.clone(),
        });
    }
    Ok(price.to_signed_bytes())
}

fn decode_price(currency_pair: &CurrencyPair, bytes: &[u8]) -> Result<Price, StrategyError> {
    let price = Price::from_signed_bytes(bytes)?;
    if price.is_negative() {
        return Err(StrategyError::NegativePrice {
            currency_pair: currency_pair.clone(),
        });
    }
    Ok(price)
}

/// ID strategy keyed by a stable hash of the canonical pair string: the ID
/// is the lower 64 bits of the SHA-256 digest. Robust across pair additions
/// and removals.
pub struct HashCurrencyPairStrategy {
    registry: Arc<dyn PairRegistry>,
}

impl HashCurrencyPairStrategy {
    #[must_use]
    pub fn new(registry: Arc<dyn PairRegistry>) -> Self {
        Self {
            registry,
        }
    }

    fn hash_id(currency_pair: &CurrencyPair) -> CurrencyPairId {
        let digest = Sha256::digest(currency_pair.to_string().as_bytes());
        let low_bits = <[u8; 8]>::try_from(&digest[24..32]).expect("slice is 8 bytes");
        CurrencyPairId::new(u64::from_be_bytes(low_bits))
    }
}

#[async_trait]
impl CurrencyPairStrategy for HashCurrencyPairStrategy {
    async fn id(&self, currency_pair: &CurrencyPair) -> Result<CurrencyPairId, StrategyError> {
        let pairs = self
            .registry
            .currency_pairs()
            .await
            .map_err(StrategyError::registry)?;
        if !pairs.contains(currency_pair) {
            return Err(StrategyError::UnknownCurrencyPair {
                currency_pair: currency_pair.clone(),
            });
        }
        Ok(Self::hash_id(currency_pair))
    }

    async fn from_id(&self, id: CurrencyPairId) -> Result<CurrencyPair, StrategyError> {
        let pairs = self
            .registry
            .currency_pairs()
            .await
            .map_err(StrategyError::registry)?;
        pairs
            .into_iter()
            .find(|currency_pair| Self::hash_id(currency_pair) == id)
            .ok_or(StrategyError::UnknownId {
                id,
            })
    }

    async fn max_num_currency_pairs(&self) -> Result<u64, StrategyError> {
        let pairs = self
            .registry
            .currency_pairs()
            .await
            .map_err(StrategyError::registry)?;
        Ok(pairs.len() as u64)
    }

    async fn encoded_price(
        &self,
        currency_pair: &CurrencyPair,
        price: &Price,
    ) -> Result<Vec<u8>, StrategyError> {
        encode_price(currency_pair, price)
    }

    async fn decoded_price(
        &self,
        currency_pair: &CurrencyPair,
        bytes: &[u8],
    ) -> Result<Price, StrategyError> {
        decode_price(currency_pair, bytes)
    }
}

/// ID strategy keyed by position in the registry sorted by canonical pair
/// string. Compact, but the mapping shifts whenever the registry changes
/// across heights.
pub struct DeltaCurrencyPairStrategy {
    registry: Arc<dyn PairRegistry>,
}

impl DeltaCurrencyPairStrategy {
    #[must_use]
    pub fn new(registry: Arc<dyn PairRegistry>) -> Self {
        Self {
            registry,
        }
    }

    async fn sorted_pairs(&self) -> Result<Vec<CurrencyPair>, StrategyError> {
        let mut pairs = self
            .registry
            .currency_pairs()
            .await
            .map_err(StrategyError::registry)?;
        pairs.sort();
        Ok(pairs)
    }
}

#[async_trait]
impl CurrencyPairStrategy for DeltaCurrencyPairStrategy {
    async fn id(&self, currency_pair: &CurrencyPair) -> Result<CurrencyPairId, StrategyError> {
        let pairs = self.sorted_pairs().await?;
        pairs
            .iter()
            .position(|pair| pair == currency_pair)
            .map(|position| CurrencyPairId::new(position as u64))
            .ok_or_else(|| StrategyError::UnknownCurrencyPair {
                currency_pair: currency_pair.clone(),
            })
    }

    async fn from_id(&self, id: CurrencyPairId) -> Result<CurrencyPair, StrategyError> {
        let pairs = self.sorted_pairs().await?;
        usize::try_from(id.get())
            .ok()
            .and_then(|position| pairs.get(position).cloned())
            .ok_or(StrategyError::UnknownId {
                id,
            })
    }

    async fn max_num_currency_pairs(&self) -> Result<u64, StrategyError> {
        let pairs = self.sorted_pairs().await?;
        Ok(pairs.len() as u64)
    }

    async fn encoded_price(
        &self,
        currency_pair: &CurrencyPair,
        price: &Price,
    ) -> Result<Vec<u8>, StrategyError> {
        encode_price(currency_pair, price)
    }

    async fn decoded_price(
        &self,
        currency_pair: &CurrencyPair,
        bytes: &[u8],
    ) -> Result<Price, StrategyError> {
        decode_price(currency_pair, bytes)
    }
}
