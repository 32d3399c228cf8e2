use std::collections::BTreeMap;

use crate::types::{
    CurrencyPair,
    Price,
};

/// The decoded prices of one validator, weighted by its voting power.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorPrices {
    pub power: u64,
    pub prices: BTreeMap<CurrencyPair, Price>,
}

/// The canonical per-pair price derived from one height's vote extensions.
///
/// Aggregates only live for the duration of a single pre-block invocation:
/// they are written to oracle state and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerPairAggregate {
    pub currency_pair: CurrencyPair,
    pub price: Price,
    pub num_validators: usize,
}

/// Computes the stake-weighted median of the given `(price, power)`
/// contributions: the first price, in ascending price order, at which
/// cumulative power reaches 50% of the contributed power. Ties break toward
/// the lower price.
///
/// Returns `None` if there are no contributions.
#[must_use]
pub fn stake_weighted_median(mut contributions: Vec<(Price, u64)>) -> Option<Price> {
    contributions.sort_by(|a, b| a.0.cmp(&b.0));
    let total: u128 = contributions
        .iter()
        .map(|(_, power)| u128::from(*power))
        .sum();
    let mut cumulative: u128 = 0;
    for (price, power) in contributions {
        cumulative = cumulative.saturating_add(u128::from(power));
        if cumulative.saturating_mul(2) >= total {
            return Some(price);
        }
    }
    None
}

/// Aggregates per-validator prices into one [`PerPairAggregate`] per pair
/// whose contributed power reaches `quorum_power`, sorted by pair.
#[must_use]
pub fn aggregate(votes: &[ValidatorPrices], quorum_power: u128) -> Vec<PerPairAggregate> {
    let mut contributions: BTreeMap<CurrencyPair, Vec<(Price, u64)>> = BTreeMap::new();
    for vote in votes {
        for (currency_pair, price) in &vote.prices {
            contributions
                .entry(currency_pair.clone())
                .or_default()
                .push((price.clone(), vote.power));
        }
    }

    contributions
        .into_iter()
        .filter_map(|(currency_pair, entries)| {
            let contributed: u128 = entries.iter().map(|(_, power)| u128::from(*power)).sum();
            if contributed < quorum_power {
                return None;
            }
            let num_validators = entries.len();
            stake_weighted_median(entries).map(|price| PerPairAggregate {
                currency_pair,
                price,
                num_validators,
            })
        })
        .collect()
}
