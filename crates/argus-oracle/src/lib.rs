//! The validator-side oracle vote-extension pipeline.
//!
//! Each block, the [`ve::Handler`] queries the local oracle sidecar and
//! publishes its quotes as a vote extension, and verifies the extensions of
//! peers. The [`proposal::ProposalHandler`] injects the aggregated extended
//! commit into the next proposal as `tx[0]` and re-verifies it on the
//! receiving side. The [`preblock::PreBlockHandler`] derives the per-pair
//! reference prices and per-validator SLA statuses during block
//! finalization.
//!
//! The oracle daemon, keeper-backed state, and the consensus engine itself
//! are collaborators behind traits; only the ABCI++ contract is assumed.

pub mod client;
pub mod config;
pub mod error;
pub mod keepers;
pub mod metrics;
pub mod preblock;
pub mod proposal;
pub mod strategies;
pub mod ve;

#[cfg(test)]
mod test_utils;

pub use config::Config;
