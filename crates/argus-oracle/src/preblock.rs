use std::{
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use argus_core::{
    aggregator::{
        aggregate,
        ValidatorPrices,
    },
    codec::{
        ExtendedCommitCodec,
        VoteExtensionCodec,
    },
    sla::{
        SlaStatusUpdate,
        UpdateStatus,
    },
    types::{
        CurrencyPair,
        Price,
    },
};
use eyre::eyre;
use futures::FutureExt as _;
use tendermint::{
    abci::{
        request,
        types::{
            BlockSignatureInfo,
            ExtendedVoteInfo,
        },
        Event,
        EventAttributeIndexExt as _,
    },
    account,
    block::BlockIdFlag,
};
use tracing::{
    debug,
    instrument,
    warn,
};

use crate::{
    error::{
        panic_message,
        HandlerError,
    },
    keepers::{
        OracleKeeper,
        QuotePrice,
        SlaKeeper,
    },
    metrics::{
        AbciMethod,
        MessageKind,
        MethodObservation,
        Metrics,
        SUCCESS_LABEL,
    },
    strategies::CurrencyPairStrategy,
};

fn has_voted(vote: &ExtendedVoteInfo) -> bool {
    matches!(
        vote.sig_info,
        BlockSignatureInfo::Flag(BlockIdFlag::Commit) | BlockSignatureInfo::LegacySigned,
    )
}

struct DecodedVote {
    address: account::Id,
    voted: bool,
    prices: BTreeMap<CurrencyPair, Price>,
}

/// Implements the `PreBlock` hook: decodes the injected extended commit,
/// derives the per-pair reference prices, writes them to oracle state, and
/// publishes the per-validator SLA statuses.
///
/// Errors out of `pre_block` are consensus-critical; the embedding
/// application is expected to halt on them.
pub struct PreBlockHandler {
    strategy: Arc<dyn CurrencyPairStrategy>,
    vote_extension_codec: Arc<dyn VoteExtensionCodec>,
    extended_commit_codec: ExtendedCommitCodec,
    oracle_keeper: Arc<dyn OracleKeeper>,
    sla_keeper: Arc<dyn SlaKeeper>,
    metrics: Arc<dyn Metrics>,
}

impl PreBlockHandler {
    #[must_use]
    pub fn new(
        strategy: Arc<dyn CurrencyPairStrategy>,
        vote_extension_codec: Arc<dyn VoteExtensionCodec>,
        extended_commit_codec: ExtendedCommitCodec,
        oracle_keeper: Arc<dyn OracleKeeper>,
        sla_keeper: Arc<dyn SlaKeeper>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            strategy,
            vote_extension_codec,
            extended_commit_codec,
            oracle_keeper,
            sla_keeper,
            metrics,
        }
    }

    /// Runs pre-block for the given `FinalizeBlock` request, returning one
    /// `price_update` event per pair whose price was written.
    ///
    /// # Errors
    ///
    /// Returns an error for a nil request, a missing or undecodable
    /// injected commit past genesis, or a keeper failure.
    #[instrument(skip_all)]
    pub async fn pre_block(
        &self,
        request: Option<request::FinalizeBlock>,
    ) -> Result<Vec<Event>, HandlerError> {
        let mut observation = MethodObservation::new(self.metrics.clone(), AbciMethod::PreBlock);
        let result = AssertUnwindSafe(self.pre_block_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::panic(
                    AbciMethod::PreBlock,
                    panic_message(panic),
                ))
            });
        match &result {
            Ok(_) => observation.set_outcome(SUCCESS_LABEL),
            Err(error) => {
                warn!(%error, "pre-block failed");
                observation.set_outcome(error.metrics_label());
            }
        }
        result
    }

    async fn pre_block_inner(
        &self,
        request: Option<request::FinalizeBlock>,
    ) -> Result<Vec<Event>, HandlerError> {
        let Some(request) = request else {
            return Err(HandlerError::nil_request(AbciMethod::PreBlock));
        };
        let height = request.height.value();

        // No extended commit exists before vote extensions are first cast.
        if height <= 1 {
            return Ok(Vec::new());
        }
        let Some(commit_tx) = request.txs.first() else {
            return Err(HandlerError::MissingExtendedCommit);
        };
        self.metrics
            .observe_message_size(MessageKind::ExtendedCommit, commit_tx.len());
        let commit = self.extended_commit_codec.decode(commit_tx)?;

        let mut decoded_votes = Vec::with_capacity(commit.votes.len());
        let mut validator_prices = Vec::new();
        let mut total_power: u128 = 0;
        for vote in &commit.votes {
            let address = account::Id::new(vote.validator.address);
            let voted = has_voted(vote);
            let mut prices = BTreeMap::new();
            if voted {
                total_power = total_power.saturating_add(u128::from(vote.validator.power.value()));
                if !vote.vote_extension.is_empty() {
                    let vote_extension =
                        self.vote_extension_codec.decode(&vote.vote_extension)?;
                    prices = self.decode_prices(vote_extension).await;
                }
                validator_prices.push(ValidatorPrices {
                    power: vote.validator.power.value(),
                    prices: prices.clone(),
                });
            }
            decoded_votes.push(DecodedVote {
                address,
                voted,
                prices,
            });
        }

        let params = self
            .oracle_keeper
            .params()
            .await
            .map_err(|source| HandlerError::keeper("failed reading oracle params", source))?;
        if params.quorum_denominator == 0 {
            return Err(HandlerError::keeper(
                "invalid oracle params",
                eyre!("quorum denominator is zero"),
            ));
        }
        let quorum_power = total_power
            .saturating_mul(u128::from(params.quorum_numerator))
            .div_ceil(u128::from(params.quorum_denominator));

        let mut events = Vec::new();
        for aggregate in aggregate(&validator_prices, quorum_power) {
            self.oracle_keeper
                .set_price(
                    &aggregate.currency_pair,
                    QuotePrice {
                        price: aggregate.price.clone(),
                        block_height: height,
                        block_timestamp: request.time,
                    },
                )
                .await
                .map_err(|source| {
                    HandlerError::keeper("failed writing aggregated price", source)
                })?;
            events.push(Event::new(
                "price_update",
                [
                    ("currency_pair", aggregate.currency_pair.to_string()).index(),
                    ("price", aggregate.price.to_string()).index(),
                    ("num_validators", aggregate.num_validators.to_string()).index(),
                ],
            ));
        }

        let updates = self.sla_status_updates(&decoded_votes).await?;
        self.sla_keeper
            .record_status_updates(height, updates)
            .await
            .map_err(|source| HandlerError::keeper("failed recording sla statuses", source))?;

        Ok(events)
    }

    /// Resolves a decoded vote extension against the current registry.
    ///
    /// Entries that no longer resolve are skipped rather than failing the
    /// block: the commit was verified when it was proposed, so a miss here
    /// means the registry changed in between, which must not invalidate the
    /// remaining prices.
    async fn decode_prices(
        &self,
        vote_extension: argus_core::vote_extension::OracleVoteExtension,
    ) -> BTreeMap<CurrencyPair, Price> {
        let mut prices = BTreeMap::new();
        for (id, bytes) in vote_extension.prices {
            let currency_pair = match self.strategy.from_id(id).await {
                Ok(currency_pair) => currency_pair,
                Err(error) => {
                    debug!(%id, %error, "skipping unresolvable currency pair id");
                    continue;
                }
            };
            let price = match self.strategy.decoded_price(&currency_pair, &bytes).await {
                Ok(price) => price,
                Err(error) => {
                    debug!(%currency_pair, %error, "skipping undecodable price");
                    continue;
                }
            };
            prices.insert(currency_pair, price);
        }
        prices
    }

    /// Classifies every `(validator, pair)` combination known at this
    /// height; the resulting map carries exactly one status per
    /// combination.
    async fn sla_status_updates(
        &self,
        decoded_votes: &[DecodedVote],
    ) -> Result<Vec<SlaStatusUpdate>, HandlerError> {
        let registry_pairs = self
            .oracle_keeper
            .currency_pairs()
            .await
            .map_err(|source| {
                HandlerError::keeper("failed reading currency pair registry", source)
            })?;
        let mut updates =
            Vec::with_capacity(decoded_votes.len().saturating_mul(registry_pairs.len()));
        for vote in decoded_votes {
            for currency_pair in &registry_pairs {
                let status = if !vote.voted {
                    UpdateStatus::NoVote
                } else if vote.prices.contains_key(currency_pair) {
                    UpdateStatus::VoteWithPrice
                } else {
                    UpdateStatus::VoteWithoutPrice
                };
                updates.push(SlaStatusUpdate {
                    validator: vote.address,
                    currency_pair: currency_pair.clone(),
                    status,
                });
            }
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use argus_core::{
        codec::{
            CompressionVoteExtensionCodec,
            DefaultVoteExtensionCodec,
            NoopCompressor,
        },
        types::CurrencyPairId,
    };
    use bytes::Bytes;

    use super::*;
    use crate::{
        strategies::DeltaCurrencyPairStrategy,
        test_utils::{
            encode_vote_extension,
            new_extended_commit,
            new_finalize_block_request,
            new_vote,
            validator_address,
            MockOracleKeeper,
            MockSlaKeeper,
            RecordingMetrics,
        },
    };

    struct Fixture {
        handler: PreBlockHandler,
        oracle_keeper: Arc<MockOracleKeeper>,
        sla_keeper: Arc<MockSlaKeeper>,
        codec: Arc<dyn VoteExtensionCodec>,
        metrics: Arc<RecordingMetrics>,
    }

    fn new_fixture(pairs: &[&str]) -> Fixture {
        let oracle_keeper = Arc::new(MockOracleKeeper::new(pairs));
        let sla_keeper = Arc::new(MockSlaKeeper::default());
        let codec: Arc<dyn VoteExtensionCodec> = Arc::new(CompressionVoteExtensionCodec::new(
            DefaultVoteExtensionCodec,
            NoopCompressor,
        ));
        let metrics = Arc::new(RecordingMetrics::default());
        let handler = PreBlockHandler::new(
            Arc::new(DeltaCurrencyPairStrategy::new(oracle_keeper.clone())),
            codec.clone(),
            ExtendedCommitCodec::new(),
            oracle_keeper.clone(),
            sla_keeper.clone(),
            metrics.clone(),
        );
        Fixture {
            handler,
            oracle_keeper,
            sla_keeper,
            codec,
            metrics,
        }
    }

    fn encoded(value: i64) -> Vec<u8> {
        Price::from(value).to_signed_bytes()
    }

    fn extension_with_price(codec: &dyn VoteExtensionCodec, id: u64, value: i64) -> Bytes {
        encode_vote_extension(
            codec,
            std::collections::BTreeMap::from([(CurrencyPairId::new(id), encoded(value))]),
        )
    }

    fn commit_tx(fixture: &Fixture, votes: Vec<ExtendedVoteInfo>) -> Bytes {
        fixture
            .handler
            .extended_commit_codec
            .encode(&new_extended_commit(votes))
            .unwrap()
    }

    #[tokio::test]
    async fn three_equal_validators_aggregate_to_the_middle_price() {
        let fixture = new_fixture(&["BTC/USD"]);
        let votes = vec![
            new_vote(
                1,
                10,
                BlockIdFlag::Commit,
                extension_with_price(fixture.codec.as_ref(), 0, 90),
            ),
            new_vote(
                2,
                10,
                BlockIdFlag::Commit,
                extension_with_price(fixture.codec.as_ref(), 0, 100),
            ),
            new_vote(
                3,
                10,
                BlockIdFlag::Commit,
                extension_with_price(fixture.codec.as_ref(), 0, 110),
            ),
        ];
        let tx = commit_tx(&fixture, votes);
        let events = fixture
            .handler
            .pre_block(Some(new_finalize_block_request(100, vec![tx])))
            .await
            .unwrap();

        let written = fixture.oracle_keeper.written_prices();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0.to_string(), "BTC/USD");
        assert_eq!(written[0].1.price, Price::from(100_i64));
        assert_eq!(written[0].1.block_height, 100);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "price_update");

        // all three validators supplied a valid price
        let (height, updates) = &fixture.sla_keeper.recorded_updates()[0];
        assert_eq!(*height, 100);
        assert_eq!(updates.len(), 3);
        assert!(updates
            .iter()
            .all(|update| update.status == UpdateStatus::VoteWithPrice));

        assert_eq!(
            fixture.metrics.outcomes(),
            vec![(AbciMethod::PreBlock, SUCCESS_LABEL)]
        );
    }

    #[tokio::test]
    async fn sla_statuses_cover_every_validator_pair_combination() {
        let fixture = new_fixture(&["BTC/USD", "ETH/USD"]);
        let votes = vec![
            // votes with a BTC price only
            new_vote(
                1,
                10,
                BlockIdFlag::Commit,
                extension_with_price(fixture.codec.as_ref(), 0, 100),
            ),
            // votes without any price
            new_vote(2, 10, BlockIdFlag::Commit, Bytes::new()),
            // did not sign the commit
            new_vote(3, 10, BlockIdFlag::Absent, Bytes::new()),
        ];
        let tx = commit_tx(&fixture, votes);
        fixture
            .handler
            .pre_block(Some(new_finalize_block_request(100, vec![tx])))
            .await
            .unwrap();

        let (_, updates) = &fixture.sla_keeper.recorded_updates()[0];
        assert_eq!(updates.len(), 6);

        let status_of = |seed: u8, pair: &str| {
            updates
                .iter()
                .find(|update| {
                    update.validator == validator_address(seed)
                        && update.currency_pair.to_string() == pair
                })
                .map(|update| update.status)
                .unwrap()
        };
        assert_eq!(status_of(1, "BTC/USD"), UpdateStatus::VoteWithPrice);
        assert_eq!(status_of(1, "ETH/USD"), UpdateStatus::VoteWithoutPrice);
        assert_eq!(status_of(2, "BTC/USD"), UpdateStatus::VoteWithoutPrice);
        assert_eq!(status_of(2, "ETH/USD"), UpdateStatus::VoteWithoutPrice);
        assert_eq!(status_of(3, "BTC/USD"), UpdateStatus::NoVote);
        assert_eq!(status_of(3, "ETH/USD"), UpdateStatus::NoVote);
    }

    #[tokio::test]
    async fn pairs_without_quorum_are_not_written() {
        let fixture = new_fixture(&["BTC/USD", "ETH/USD"]);
        let votes = vec![
            new_vote(
                1,
                10,
                BlockIdFlag::Commit,
                extension_with_price(fixture.codec.as_ref(), 0, 100),
            ),
            new_vote(2, 10, BlockIdFlag::Commit, Bytes::new()),
            new_vote(3, 10, BlockIdFlag::Commit, Bytes::new()),
        ];
        let tx = commit_tx(&fixture, votes);
        fixture
            .handler
            .pre_block(Some(new_finalize_block_request(100, vec![tx])))
            .await
            .unwrap();

        // only 10 of 30 power priced BTC/USD, below the 2/3 quorum
        assert!(fixture.oracle_keeper.written_prices().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_ids_are_skipped_not_fatal() {
        let fixture = new_fixture(&["BTC/USD"]);
        let votes = vec![new_vote(
            1,
            10,
            BlockIdFlag::Commit,
            extension_with_price(fixture.codec.as_ref(), 7, 100),
        )];
        let tx = commit_tx(&fixture, votes);
        fixture
            .handler
            .pre_block(Some(new_finalize_block_request(100, vec![tx])))
            .await
            .unwrap();
        assert!(fixture.oracle_keeper.written_prices().is_empty());

        // the validator voted but its only price no longer resolves
        let (_, updates) = &fixture.sla_keeper.recorded_updates()[0];
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, UpdateStatus::VoteWithoutPrice);
    }

    #[tokio::test]
    async fn genesis_block_has_no_commit_and_no_events() {
        let fixture = new_fixture(&["BTC/USD"]);
        let events = fixture
            .handler
            .pre_block(Some(new_finalize_block_request(1, vec![])))
            .await
            .unwrap();
        assert!(events.is_empty());
        assert!(fixture.oracle_keeper.written_prices().is_empty());
        assert!(fixture.sla_keeper.recorded_updates().is_empty());
    }

    #[tokio::test]
    async fn missing_commit_past_genesis_is_fatal() {
        let fixture = new_fixture(&["BTC/USD"]);
        let err = fixture
            .handler
            .pre_block(Some(new_finalize_block_request(100, vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::MissingExtendedCommit));
        assert_eq!(
            fixture.metrics.outcomes(),
            vec![(AbciMethod::PreBlock, "missing_extended_commit")]
        );
    }

    #[tokio::test]
    async fn undecodable_commit_is_fatal() {
        let fixture = new_fixture(&["BTC/USD"]);
        let err = fixture
            .handler
            .pre_block(Some(new_finalize_block_request(
                100,
                vec![Bytes::from_static(b"garbage")],
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Codec(_)));
    }

    #[tokio::test]
    async fn nil_request_is_an_error() {
        let fixture = new_fixture(&["BTC/USD"]);
        let err = fixture.handler.pre_block(None).await.unwrap_err();
        assert!(matches!(err, HandlerError::NilRequest { .. }));
    }
}
