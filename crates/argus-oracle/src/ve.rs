use std::{
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use argus_core::{
    codec::VoteExtensionCodec,
    generated::argus::oracle::v1::QueryPricesResponse,
    types::{
        CurrencyPair,
        Price,
    },
    vote_extension::OracleVoteExtension,
};
use futures::FutureExt as _;
use tendermint::{
    abci::{
        request,
        response,
        types::CommitInfo,
    },
    block::Round,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    client::{
        OracleClient,
        OracleClientError,
    },
    error::{
        panic_message,
        HandlerError,
        ValidationError,
    },
    keepers::PreBlocker,
    metrics::{
        AbciMethod,
        MessageKind,
        MethodObservation,
        Metrics,
        SUCCESS_LABEL,
    },
    strategies::CurrencyPairStrategy,
};

/// Implements the `ExtendVote` and `VerifyVoteExtension` ABCI++ hooks.
///
/// All collaborators are injected at construction and read-only thereafter.
pub struct Handler {
    oracle_client: Arc<dyn OracleClient>,
    client_timeout: Duration,
    strategy: Arc<dyn CurrencyPairStrategy>,
    codec: Arc<dyn VoteExtensionCodec>,
    pre_blocker: Arc<dyn PreBlocker>,
    metrics: Arc<dyn Metrics>,
    cancellation_token: CancellationToken,
}

impl Handler {
    #[must_use]
    pub fn new(
        oracle_client: Arc<dyn OracleClient>,
        client_timeout: Duration,
        strategy: Arc<dyn CurrencyPairStrategy>,
        codec: Arc<dyn VoteExtensionCodec>,
        pre_blocker: Arc<dyn PreBlocker>,
        metrics: Arc<dyn Metrics>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            oracle_client,
            client_timeout,
            strategy,
            codec,
            pre_blocker,
            metrics,
            cancellation_token,
        }
    }

    /// Queries the local oracle sidecar and returns its quotes as encoded
    /// vote-extension bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for a nil request, a pre-block warm-up failure, an
    /// oracle client error or deadline, a malformed pair in the oracle
    /// response, or an encoding failure. The engine treats an empty
    /// extension as an abstention, so callers should emit empty bytes when
    /// this errors.
    #[instrument(skip_all)]
    pub async fn extend_vote(
        &self,
        request: Option<request::ExtendVote>,
    ) -> Result<response::ExtendVote, HandlerError> {
        let mut observation = MethodObservation::new(self.metrics.clone(), AbciMethod::ExtendVote);
        let result = AssertUnwindSafe(self.extend_vote_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::panic(
                    AbciMethod::ExtendVote,
                    panic_message(panic),
                ))
            });
        match &result {
            Ok(extend_vote) => {
                observation.set_outcome(SUCCESS_LABEL);
                self.metrics.observe_message_size(
                    MessageKind::VoteExtension,
                    extend_vote.vote_extension.len(),
                );
            }
            Err(error) => {
                warn!(%error, "failed to extend vote; the emitted extension will be empty");
                observation.set_outcome(error.metrics_label());
                self.metrics
                    .observe_message_size(MessageKind::VoteExtension, 0);
            }
        }
        result
    }

    async fn extend_vote_inner(
        &self,
        request: Option<request::ExtendVote>,
    ) -> Result<response::ExtendVote, HandlerError> {
        let Some(request) = request else {
            return Err(HandlerError::nil_request(AbciMethod::ExtendVote));
        };

        // Run the pre-block adapter so that registry and params reflect the
        // height being voted on.
        self.pre_blocker
            .pre_block(&synthesize_finalize_block(&request))
            .await
            .map_err(HandlerError::pre_block_failure)?;

        let response = tokio::select! {
            biased;

            () = self.cancellation_token.cancelled() => {
                info!("extend vote cancelled; abstaining");
                None
            }
            result = tokio::time::timeout(self.client_timeout, self.oracle_client.prices()) => {
                match result {
                    Err(_) => {
                        return Err(OracleClientError::DeadlineExceeded {
                            timeout: self.client_timeout,
                        }
                        .into());
                    }
                    Ok(Err(error)) => return Err(error.into()),
                    Ok(Ok(response)) => response,
                }
            }
        };

        let vote_extension = match response {
            Some(response) => self.transform_oracle_prices(response).await?,
            None => OracleVoteExtension::default(),
        };

        let bytes = self.codec.encode(&vote_extension)?;
        Ok(response::ExtendVote {
            vote_extension: bytes,
        })
    }

    /// Maps the oracle response onto the compact on-wire form.
    ///
    /// Entries that fail ID resolution, price parsing, or price encoding are
    /// dropped so that one bad quote cannot suppress the rest; a malformed
    /// pair string means the oracle output itself is corrupt and fails the
    /// whole call.
    async fn transform_oracle_prices(
        &self,
        response: QueryPricesResponse,
    ) -> Result<OracleVoteExtension, HandlerError> {
        let mut prices = BTreeMap::new();
        for (pair_string, price_string) in response.prices {
            let currency_pair: CurrencyPair = pair_string
                .parse()
                .map_err(HandlerError::transform_prices)?;
            let id = match self.strategy.id(&currency_pair).await {
                Ok(id) => id,
                Err(error) => {
                    debug!(%currency_pair, %error, "failed to resolve currency pair id; dropping entry");
                    continue;
                }
            };
            let price: Price = match price_string.parse() {
                Ok(price) => price,
                Err(error) => {
                    debug!(%currency_pair, %error, "failed to parse oracle price; dropping entry");
                    continue;
                }
            };
            let encoded_price = match self.strategy.encoded_price(&currency_pair, &price).await {
                Ok(encoded_price) => encoded_price,
                Err(error) => {
                    debug!(%currency_pair, %error, "failed to encode price; dropping entry");
                    continue;
                }
            };
            prices.insert(id, encoded_price);
        }
        Ok(OracleVoteExtension {
            prices,
        })
    }

    /// Verifies a peer's vote extension against the current registry
    /// snapshot.
    ///
    /// Verification is pure: it reads state but never writes, so identical
    /// input at identical height yields the identical status on every
    /// replica. An error means the extension must be rejected.
    ///
    /// # Errors
    ///
    /// Returns an error for a nil request, undecodable bytes, or a payload
    /// failing semantic validation.
    #[instrument(skip_all)]
    pub async fn verify_vote_extension(
        &self,
        request: Option<request::VerifyVoteExtension>,
    ) -> Result<response::VerifyVoteExtension, HandlerError> {
        let mut observation =
            MethodObservation::new(self.metrics.clone(), AbciMethod::VerifyVoteExtension);
        let received_size = request
            .as_ref()
            .map_or(0, |request| request.vote_extension.len());
        let result = AssertUnwindSafe(self.verify_vote_extension_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::panic(
                    AbciMethod::VerifyVoteExtension,
                    panic_message(panic),
                ))
            });
        match &result {
            Ok(_) => observation.set_outcome(SUCCESS_LABEL),
            Err(error) => {
                warn!(%error, "rejecting vote extension");
                observation.set_outcome(error.metrics_label());
            }
        }
        self.metrics
            .observe_message_size(MessageKind::VoteExtension, received_size);
        result
    }

    async fn verify_vote_extension_inner(
        &self,
        request: Option<request::VerifyVoteExtension>,
    ) -> Result<response::VerifyVoteExtension, HandlerError> {
        let Some(request) = request else {
            return Err(HandlerError::nil_request(AbciMethod::VerifyVoteExtension));
        };

        // An empty extension is a legal abstention.
        if request.vote_extension.is_empty() {
            return Ok(response::VerifyVoteExtension::Accept);
        }

        let vote_extension = self.codec.decode(&request.vote_extension)?;
        validate_vote_extension(self.strategy.as_ref(), &vote_extension).await?;
        Ok(response::VerifyVoteExtension::Accept)
    }
}

/// Validates a decoded vote extension: every ID must resolve to a known
/// pair, and every price value must decode under that pair's constraints.
///
/// Shared between `VerifyVoteExtension` and the proposal handler so that the
/// two phases cannot diverge.
pub(crate) async fn validate_vote_extension(
    strategy: &dyn CurrencyPairStrategy,
    vote_extension: &OracleVoteExtension,
) -> Result<(), HandlerError> {
    let max_num_currency_pairs = strategy
        .max_num_currency_pairs()
        .await
        .map_err(HandlerError::validate_vote_extension)?;
    if vote_extension.prices.len() as u64 > max_num_currency_pairs {
        return Err(HandlerError::validate_vote_extension(
            ValidationError::TooManyPrices {
                got: vote_extension.prices.len(),
                max: max_num_currency_pairs,
            },
        ));
    }
    for (id, bytes) in &vote_extension.prices {
        let currency_pair = strategy
            .from_id(*id)
            .await
            .map_err(HandlerError::validate_vote_extension)?;
        strategy
            .decoded_price(&currency_pair, bytes)
            .await
            .map_err(HandlerError::validate_vote_extension)?;
    }
    Ok(())
}

/// Builds the `FinalizeBlock`-shaped argument handed to the pre-block
/// adapter during the `ExtendVote` warm-up.
fn synthesize_finalize_block(request: &request::ExtendVote) -> request::FinalizeBlock {
    request::FinalizeBlock {
        hash: request.hash,
        height: request.height,
        time: request.time,
        next_validators_hash: request.next_validators_hash,
        proposer_address: request.proposer_address,
        decided_last_commit: request.proposed_last_commit.clone().unwrap_or(CommitInfo {
            round: Round::default(),
            votes: Vec::new(),
        }),
        misbehavior: request.misbehavior.clone(),
        txs: request.txs.clone(),
    }
}
