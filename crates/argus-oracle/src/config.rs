use std::{
    sync::Arc,
    time::Duration,
};

use argus_core::codec::{
    CompressionVoteExtensionCodec,
    DefaultVoteExtensionCodec,
    ExtendedCommitCodec,
    NoopCompressor,
    VoteExtensionCodec,
    ZlibCompressor,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    keepers::PairRegistry,
    strategies::{
        CurrencyPairStrategy,
        DeltaCurrencyPairStrategy,
        HashCurrencyPairStrategy,
    },
};

/// The utility of the oracle daemon drops steeply once the engine moves on,
/// so the client deadline defaults to well under a block time.
const DEFAULT_CLIENT_TIMEOUT_MS: u64 = 1_000;

const DEFAULT_MAX_VOTE_EXTENSION_BYTES: usize = 1_048_576;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    None,
    Deflate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Hash,
    Delta,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log level: debug, info, warn, or error.
    pub log: String,
    /// The gRPC endpoint of the local oracle sidecar.
    pub oracle_grpc_endpoint: String,
    /// Deadline for one oracle `Prices` query, in milliseconds.
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
    /// Which vote-extension codec to use on the wire.
    #[serde(default = "default_codec")]
    pub codec: CodecKind,
    /// Post-compression cap on any emitted vote extension.
    #[serde(default = "default_max_vote_extension_bytes")]
    pub max_vote_extension_bytes: usize,
    /// Which currency-pair ID strategy to use.
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
}

fn default_client_timeout_ms() -> u64 {
    DEFAULT_CLIENT_TIMEOUT_MS
}

fn default_codec() -> CodecKind {
    CodecKind::Deflate
}

fn default_max_vote_extension_bytes() -> usize {
    DEFAULT_MAX_VOTE_EXTENSION_BYTES
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Hash
}

impl Config {
    const PREFIX: &'static str = "ARGUS_ORACLE_";

    /// Reads the configuration from `ARGUS_ORACLE_`-prefixed environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does
    /// not parse.
    pub fn get() -> Result<Self, figment::Error> {
        use figment::{
            providers::Env as FigmentEnv,
            Figment,
        };
        Figment::new()
            .merge(FigmentEnv::prefixed("RUST_").split("_").only(&["log"]))
            .merge(FigmentEnv::prefixed(Self::PREFIX))
            .extract()
    }

    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// Builds the configured vote-extension codec.
    #[must_use]
    pub fn vote_extension_codec(&self) -> Arc<dyn VoteExtensionCodec> {
        match self.codec {
            CodecKind::None => Arc::new(
                CompressionVoteExtensionCodec::new(DefaultVoteExtensionCodec, NoopCompressor)
                    .with_max_encoded_bytes(self.max_vote_extension_bytes),
            ),
            CodecKind::Deflate => Arc::new(
                CompressionVoteExtensionCodec::new(
                    DefaultVoteExtensionCodec,
                    ZlibCompressor::new(self.max_vote_extension_bytes),
                )
                .with_max_encoded_bytes(self.max_vote_extension_bytes),
            ),
        }
    }

    /// Builds the extended-commit codec with the configured wire cap.
    #[must_use]
    pub fn extended_commit_codec(&self) -> ExtendedCommitCodec {
        ExtendedCommitCodec::new().with_max_encoded_bytes(self.max_vote_extension_bytes)
    }

    /// Builds the configured currency-pair ID strategy over the given
    /// registry.
    #[must_use]
    pub fn currency_pair_strategy(
        &self,
        registry: Arc<dyn PairRegistry>,
    ) -> Arc<dyn CurrencyPairStrategy> {
        match self.strategy {
            StrategyKind::Hash => Arc::new(HashCurrencyPairStrategy::new(registry)),
            StrategyKind::Delta => Arc::new(DeltaCurrencyPairStrategy::new(registry)),
        }
    }
}
