//! Wire and domain types for the argus oracle vote-extension pipeline:
//! currency pairs and prices, the vote-extension and extended-commit codecs,
//! and the stake-weighted price aggregation math.

pub mod aggregator;
pub mod codec;
pub mod generated;
pub mod sla;
pub mod types;
pub mod vote_extension;
pub mod zlib;
