/// OracleVoteExtension is the vote-extension payload a validator attaches to
/// its pre-commit. Prices are keyed by compact currency-pair ID; values are
/// the per-pair encoded price bytes.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OracleVoteExtension {
    /// prices defines a map of currency pair ID -> encoded price bytes.
    #[prost(btree_map = "uint64, bytes", tag = "1")]
    pub prices: ::prost::alloc::collections::BTreeMap<
        u64,
        ::prost::alloc::vec::Vec<u8>,
    >,
}
impl ::prost::Name for OracleVoteExtension {
    const NAME: &'static str = "OracleVoteExtension";
    const PACKAGE: &'static str = "argus.abci.v1";
    fn full_name() -> ::prost::alloc::string::String {
        ::prost::alloc::format!("argus.abci.v1.{}", Self::NAME)
    }
}
