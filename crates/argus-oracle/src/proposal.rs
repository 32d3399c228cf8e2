use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
};

use argus_core::codec::{
    ExtendedCommitCodec,
    VoteExtensionCodec,
};
use bytes::Bytes;
use futures::FutureExt as _;
use tendermint::{
    abci::{
        request,
        response,
        types::{
            BlockSignatureInfo,
            ExtendedCommitInfo,
            ExtendedVoteInfo,
        },
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
        ValidationError,
    },
    metrics::{
        AbciMethod,
        MessageKind,
        MethodObservation,
        Metrics,
        SUCCESS_LABEL,
    },
    strategies::CurrencyPairStrategy,
    ve,
};

fn has_voted(vote: &ExtendedVoteInfo) -> bool {
    matches!(
        vote.sig_info,
        BlockSignatureInfo::Flag(BlockIdFlag::Commit) | BlockSignatureInfo::LegacySigned,
    )
}

/// Implements the `PrepareProposal` and `ProcessProposal` ABCI++ hooks:
/// injection of the aggregated extended commit as `tx[0]` on the proposer
/// side, and deterministic re-verification on the receiving side.
pub struct ProposalHandler {
    strategy: Arc<dyn CurrencyPairStrategy>,
    vote_extension_codec: Arc<dyn VoteExtensionCodec>,
    extended_commit_codec: ExtendedCommitCodec,
    metrics: Arc<dyn Metrics>,
}

impl ProposalHandler {
    #[must_use]
    pub fn new(
        strategy: Arc<dyn CurrencyPairStrategy>,
        vote_extension_codec: Arc<dyn VoteExtensionCodec>,
        extended_commit_codec: ExtendedCommitCodec,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            strategy,
            vote_extension_codec,
            extended_commit_codec,
            metrics,
        }
    }

    /// Builds the proposal transaction list: the encoded extended commit for
    /// the previous height is injected as `tx[0]`, then mempool transactions
    /// follow in arrival order up to `max_tx_bytes`. The injected commit is
    /// never dropped.
    ///
    /// # Errors
    ///
    /// Returns an error for a nil request or if the filtered commit cannot
    /// be encoded.
    #[instrument(skip_all)]
    pub async fn prepare_proposal(
        &self,
        request: Option<request::PrepareProposal>,
    ) -> Result<response::PrepareProposal, HandlerError> {
        let mut observation =
            MethodObservation::new(self.metrics.clone(), AbciMethod::PrepareProposal);
        let result = AssertUnwindSafe(self.prepare_proposal_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::panic(
                    AbciMethod::PrepareProposal,
                    panic_message(panic),
                ))
            });
        match &result {
            Ok(_) => observation.set_outcome(SUCCESS_LABEL),
            Err(error) => {
                warn!(%error, "failed to prepare proposal");
                observation.set_outcome(error.metrics_label());
            }
        }
        result
    }

    async fn prepare_proposal_inner(
        &self,
        request: Option<request::PrepareProposal>,
    ) -> Result<response::PrepareProposal, HandlerError> {
        let Some(request) = request else {
            return Err(HandlerError::nil_request(AbciMethod::PrepareProposal));
        };

        // The engine hands over no extended commit before vote extensions
        // exist (genesis); propose a plain block then.
        let Some(local_last_commit) = request.local_last_commit else {
            let txs = shed_txs_to_fit(None, request.txs, request.max_tx_bytes);
            return Ok(response::PrepareProposal {
                txs,
            });
        };

        let filtered_commit = self.filter_extended_commit(local_last_commit).await?;
        let commit_tx = self.extended_commit_codec.encode(&filtered_commit)?;
        self.metrics
            .observe_message_size(MessageKind::ExtendedCommit, commit_tx.len());
        let txs = shed_txs_to_fit(Some(commit_tx), request.txs, request.max_tx_bytes);
        Ok(response::PrepareProposal {
            txs,
        })
    }

    /// Re-runs vote-extension verification over the commit so that a
    /// registry that changed since the extensions were cast cannot poison
    /// the block. Invalid extensions are cleared and their votes marked
    /// absent, preserving the commit's total power.
    async fn filter_extended_commit(
        &self,
        mut commit: ExtendedCommitInfo,
    ) -> Result<ExtendedCommitInfo, HandlerError> {
        for vote in &mut commit.votes {
            if vote.vote_extension.is_empty() {
                continue;
            }
            let valid = match self.vote_extension_codec.decode(&vote.vote_extension) {
                Ok(vote_extension) => {
                    ve::validate_vote_extension(self.strategy.as_ref(), &vote_extension)
                        .await
                        .is_ok()
                }
                Err(_) => false,
            };
            if !valid {
                debug!(
                    validator = %account::Id::new(vote.validator.address),
                    "dropping invalid vote extension from injected commit"
                );
                vote.vote_extension = Bytes::new();
                vote.extension_signature = None;
                vote.sig_info = BlockSignatureInfo::Flag(BlockIdFlag::Absent);
            }
        }
        Ok(commit)
    }

    /// Validates a received proposal: `tx[0]` must decode as the injected
    /// extended commit, the power behind it must clear the engine's 2/3
    /// finalization threshold, and every carried extension must re-verify.
    ///
    /// # Errors
    ///
    /// Any error means the proposal must be rejected.
    #[instrument(skip_all)]
    pub async fn process_proposal(
        &self,
        request: Option<request::ProcessProposal>,
    ) -> Result<(), HandlerError> {
        let mut observation =
            MethodObservation::new(self.metrics.clone(), AbciMethod::ProcessProposal);
        let result = AssertUnwindSafe(self.process_proposal_inner(request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::panic(
                    AbciMethod::ProcessProposal,
                    panic_message(panic),
                ))
            });
        match &result {
            Ok(()) => observation.set_outcome(SUCCESS_LABEL),
            Err(error) => {
                warn!(%error, "rejecting proposal");
                observation.set_outcome(error.metrics_label());
            }
        }
        result
    }

    async fn process_proposal_inner(
        &self,
        request: Option<request::ProcessProposal>,
    ) -> Result<(), HandlerError> {
        let Some(request) = request else {
            return Err(HandlerError::nil_request(AbciMethod::ProcessProposal));
        };

        // No commit is injected before vote extensions exist.
        if request.height.value() <= 1 {
            return Ok(());
        }

        let Some(commit_tx) = request.txs.first() else {
            return Err(HandlerError::MissingExtendedCommit);
        };
        self.metrics
            .observe_message_size(MessageKind::ExtendedCommit, commit_tx.len());
        let commit = self.extended_commit_codec.decode(commit_tx)?;

        let mut total_power: u128 = 0;
        let mut contributing_power: u128 = 0;
        for vote in &commit.votes {
            let power = u128::from(vote.validator.power.value());
            total_power = total_power.saturating_add(power);
            if has_voted(vote) {
                contributing_power = contributing_power.saturating_add(power);
            } else if !vote.vote_extension.is_empty() {
                return Err(HandlerError::validate_vote_extension(
                    ValidationError::ExtensionFromNonVoter {
                        address: account::Id::new(vote.validator.address),
                    },
                ));
            }
            if !vote.vote_extension.is_empty() {
                let vote_extension = self.vote_extension_codec.decode(&vote.vote_extension)?;
                ve::validate_vote_extension(self.strategy.as_ref(), &vote_extension).await?;
            }
        }

        // The proposer must not under-report participation: the commit has
        // to clear the same 2/3 threshold the engine applied to finalize
        // height H-1.
        if contributing_power.saturating_mul(3) < total_power.saturating_mul(2) {
            return Err(HandlerError::InsufficientVotingPower {
                contributing: contributing_power,
                total: total_power,
            });
        }

        Ok(())
    }
}

/// Keeps transactions in arrival order while the running total fits in
/// `max_tx_bytes`; everything from the first overflowing transaction on is
/// dropped. The injected commit transaction, if any, is always kept.
fn shed_txs_to_fit(commit_tx: Option<Bytes>, txs: Vec<Bytes>, max_tx_bytes: i64) -> Vec<Bytes> {
    let cap = usize::try_from(max_tx_bytes).unwrap_or(usize::MAX);
    let mut kept = Vec::with_capacity(txs.len().saturating_add(1));
    let mut total = 0_usize;
    if let Some(commit_tx) = commit_tx {
        total = commit_tx.len();
        if total > cap {
            warn!(
                commit_tx_bytes = total,
                max_tx_bytes = cap,
                "injected extended commit alone exceeds max_tx_bytes; keeping it regardless"
            );
        }
        kept.push(commit_tx);
    }
    let mut dropped = 0_usize;
    for tx in txs {
        if dropped == 0 && total.saturating_add(tx.len()) <= cap {
            total = total.saturating_add(tx.len());
            kept.push(tx);
        } else {
            dropped = dropped.saturating_add(1);
        }
    }
    if dropped > 0 {
        debug!(dropped, "dropped transactions to fit the block size limit");
    }
    kept
}
