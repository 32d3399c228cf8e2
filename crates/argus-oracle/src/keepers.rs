use argus_core::{
    sla::SlaStatusUpdate,
    types::{
        CurrencyPair,
        Price,
    },
};
use async_trait::async_trait;
use eyre::Result;
use tendermint::{
    abci::request,
    Time,
};

/// Read access to the persisted currency-pair registry, as of the height the
/// surrounding handler is executing for. Registries are read-only during a
/// handler.
#[async_trait]
pub trait PairRegistry: Send + Sync {
    /// Returns the registry snapshot for the current height.
    async fn currency_pairs(&self) -> Result<Vec<CurrencyPair>>;
}

/// Module parameters read from the parameters collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleParams {
    pub quorum_numerator: u64,
    pub quorum_denominator: u64,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            quorum_numerator: 2,
            quorum_denominator: 3,
        }
    }
}

/// An aggregated price as written to oracle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotePrice {
    pub price: Price,
    pub block_height: u64,
    pub block_timestamp: Time,
}

/// Write access to persisted oracle state. Only `pre_block` mutates oracle
/// state; the engine guarantees it exclusive access there.
#[async_trait]
pub trait OracleKeeper: PairRegistry {
    async fn params(&self) -> Result<OracleParams>;

    async fn set_price(&self, currency_pair: &CurrencyPair, quote: QuotePrice) -> Result<()>;
}

/// The SLA collaborator recording per-validator participation.
#[async_trait]
pub trait SlaKeeper: Send + Sync {
    async fn record_status_updates(&self, height: u64, updates: Vec<SlaStatusUpdate>)
        -> Result<()>;
}

/// Adapter invoked by `extend_vote` before querying the oracle so that
/// state-dependent caches (registry, params) reflect the height being voted
/// on.
#[async_trait]
pub trait PreBlocker: Send + Sync {
    async fn pre_block(&self, request: &request::FinalizeBlock) -> Result<()>;
}

/// A pre-block adapter that does nothing, for chains whose state needs no
/// warm-up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreBlocker;

#[async_trait]
impl PreBlocker for NoopPreBlocker {
    async fn pre_block(&self, _request: &request::FinalizeBlock) -> Result<()> {
        Ok(())
    }
}
