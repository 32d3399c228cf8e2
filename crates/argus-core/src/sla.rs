use tendermint::account;

use crate::types::CurrencyPair;

/// Per-validator, per-pair participation classification at one height, used
/// downstream for rewards and penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The validator signed the commit and supplied a valid price for the
    /// pair.
    VoteWithPrice,
    /// The validator signed the commit but omitted the pair.
    VoteWithoutPrice,
    /// The validator did not sign the commit.
    NoVote,
}

/// One `(validator, pair)` status record published to the SLA collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaStatusUpdate {
    pub validator: account::Id,
    pub currency_pair: CurrencyPair,
    pub status: UpdateStatus,
}
