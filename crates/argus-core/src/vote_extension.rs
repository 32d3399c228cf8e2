use std::collections::BTreeMap;

use crate::{
    generated::argus::abci::v1 as raw,
    types::CurrencyPairId,
};

/// The semantic form of a vote extension: a mapping from compact currency
/// pair ID to the per-pair encoded price bytes.
///
/// Keys are held in a `BTreeMap` so that iteration (and therefore the wire
/// encoding) is always in ascending ID order; replicas must agree on the
/// bytes, not just the contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleVoteExtension {
    pub prices: BTreeMap<CurrencyPairId, Vec<u8>>,
}

impl OracleVoteExtension {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    #[must_use]
    pub fn from_raw(raw: raw::OracleVoteExtension) -> Self {
        Self {
            prices: raw
                .prices
                .into_iter()
                .map(|(id, price)| (CurrencyPairId::new(id), price))
                .collect(),
        }
    }

    #[must_use]
    pub fn into_raw(self) -> raw::OracleVoteExtension {
        raw::OracleVoteExtension {
            prices: self
                .prices
                .into_iter()
                .map(|(id, price)| (id.get(), price))
                .collect(),
        }
    }
}

impl From<raw::OracleVoteExtension> for OracleVoteExtension {
    fn from(raw: raw::OracleVoteExtension) -> Self {
        Self::from_raw(raw)
    }
}

impl From<OracleVoteExtension> for raw::OracleVoteExtension {
    fn from(vote_extension: OracleVoteExtension) -> Self {
        vote_extension.into_raw()
    }
}
