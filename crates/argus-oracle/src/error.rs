use argus_core::{
    codec::CodecError,
    types::CurrencyPairParseError,
};
use tendermint::account;

use crate::{
    client::OracleClientError,
    metrics::AbciMethod,
    strategies::StrategyError,
};

/// The error taxonomy surfaced by the ABCI++ handlers.
///
/// Each kind carries a stable label used as the metrics outcome tag;
/// [`crate::metrics::SUCCESS_LABEL`] is the sentinel for requests that
/// complete without a surfaced error.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{handler} received a nil request")]
    NilRequest { handler: AbciMethod },
    #[error("pre-block warm-up failed: {report}")]
    PreBlockFailure { report: eyre::Report },
    #[error(transparent)]
    OracleClient(#[from] OracleClientError),
    #[error("failed to transform oracle prices: {source}")]
    TransformPrices {
        #[source]
        source: CurrencyPairParseError,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("vote extension failed validation: {source}")]
    ValidateVoteExtension {
        #[source]
        source: ValidationError,
    },
    #[error("proposal does not contain an injected extended commit")]
    MissingExtendedCommit,
    #[error(
        "vote extensions contributed {contributing} of {total} voting power, below the 2/3 \
         threshold"
    )]
    InsufficientVotingPower { contributing: u128, total: u128 },
    #[error("{context}: {report}")]
    Keeper {
        context: &'static str,
        report: eyre::Report,
    },
    #[error("{handler} panicked: {message}")]
    Panic {
        handler: AbciMethod,
        message: String,
    },
}

impl HandlerError {
    #[must_use]
    pub(crate) fn nil_request(handler: AbciMethod) -> Self {
        Self::NilRequest {
            handler,
        }
    }

    #[must_use]
    pub(crate) fn pre_block_failure(report: eyre::Report) -> Self {
        Self::PreBlockFailure {
            report,
        }
    }

    #[must_use]
    pub(crate) fn transform_prices(source: CurrencyPairParseError) -> Self {
        Self::TransformPrices {
            source,
        }
    }

    #[must_use]
    pub(crate) fn validate_vote_extension(source: impl Into<ValidationError>) -> Self {
        Self::ValidateVoteExtension {
            source: source.into(),
        }
    }

    #[must_use]
    pub(crate) fn keeper(context: &'static str, report: eyre::Report) -> Self {
        Self::Keeper {
            context,
            report,
        }
    }

    #[must_use]
    pub(crate) fn panic(handler: AbciMethod, message: String) -> Self {
        Self::Panic {
            handler,
            message,
        }
    }

    /// The stable outcome label recorded in metrics for this error kind.
    #[must_use]
    pub fn metrics_label(&self) -> &'static str {
        match self {
            Self::NilRequest { .. } => "nil_request",
            Self::PreBlockFailure { .. } => "pre_block_failure",
            Self::OracleClient(_) => "oracle_client_error",
            Self::TransformPrices { .. } => "transform_prices_error",
            Self::Codec(_) => "codec_error",
            Self::ValidateVoteExtension { .. } => "validate_vote_extension_error",
            Self::MissingExtendedCommit => "missing_extended_commit",
            Self::InsufficientVotingPower { .. } => "insufficient_voting_power",
            Self::Keeper { .. } => "keeper_error",
            Self::Panic { .. } => "panic",
        }
    }
}

/// Extracts a displayable message from a caught panic payload.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "panic payload of unknown type".to_string(),
        },
    }
}

/// Semantic validation failures of a decoded vote extension.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("vote extension contains {got} prices, more than the {max} known currency pairs")]
    TooManyPrices { got: usize, max: u64 },
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error("validator {address} is recorded as not having voted but carries a vote extension")]
    ExtensionFromNonVoter { address: account::Id },
}
