use std::{
    collections::BTreeMap,
    sync::Mutex,
    time::Duration,
};

use argus_core::{
    generated::argus::oracle::v1::QueryPricesResponse,
    sla::SlaStatusUpdate,
    types::CurrencyPair,
};
use async_trait::async_trait;
use bytes::Bytes;
use eyre::{
    eyre,
    Result,
};
use tendermint::{
    abci::{
        request,
        types::{
            BlockSignatureInfo,
            CommitInfo,
            ExtendedCommitInfo,
            ExtendedVoteInfo,
            Validator,
        },
    },
    account,
    block::BlockIdFlag,
    Hash,
    Time,
};

use crate::{
    client::{
        OracleClient,
        OracleClientError,
    },
    keepers::{
        OracleKeeper,
        OracleParams,
        PairRegistry,
        PreBlocker,
        QuotePrice,
        SlaKeeper,
    },
    metrics::{
        AbciMethod,
        MessageKind,
        Metrics,
    },
};

pub(crate) const BLOCK_HEIGHT: u8 = 100;
pub(crate) const PROPOSER_ADDRESS: &str = "0CDA3F47EF3C4906693B170EF650EB968C5F4B2C";

pub(crate) fn prices(entries: &[(&str, &str)]) -> QueryPricesResponse {
    QueryPricesResponse {
        prices: entries
            .iter()
            .map(|(pair, price)| ((*pair).to_string(), (*price).to_string()))
            .collect(),
        timestamp: None,
    }
}

enum MockResponse {
    Prices(QueryPricesResponse),
    Nil,
    Error,
    Panic,
}

pub(crate) struct MockOracleClient {
    response: MockResponse,
    delay: Option<Duration>,
}

impl MockOracleClient {
    pub(crate) fn with_prices(entries: &[(&str, &str)]) -> Self {
        Self {
            response: MockResponse::Prices(prices(entries)),
            delay: None,
        }
    }

    pub(crate) fn with_nil_response() -> Self {
        Self {
            response: MockResponse::Nil,
            delay: None,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            response: MockResponse::Error,
            delay: None,
        }
    }

    pub(crate) fn panicking() -> Self {
        Self {
            response: MockResponse::Panic,
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl OracleClient for MockOracleClient {
    async fn prices(&self) -> Result<Option<QueryPricesResponse>, OracleClientError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.response {
            MockResponse::Prices(response) => Ok(Some(response.clone())),
            MockResponse::Nil => Ok(None),
            MockResponse::Error => Err(OracleClientError::Rpc(tonic::Status::unavailable(
                "oracle sidecar unavailable",
            ))),
            MockResponse::Panic => panic!("oracle client panicked"),
        }
    }
}

pub(crate) struct StaticPairRegistry {
    pairs: Vec<CurrencyPair>,
}

impl StaticPairRegistry {
    pub(crate) fn new(pairs: &[&str]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|pair| pair.parse().expect("test pair must parse"))
                .collect(),
        }
    }
}

#[async_trait]
impl PairRegistry for StaticPairRegistry {
    async fn currency_pairs(&self) -> Result<Vec<CurrencyPair>> {
        Ok(self.pairs.clone())
    }
}

/// Keeper over a fixed registry that records every written aggregate.
pub(crate) struct MockOracleKeeper {
    pairs: Vec<CurrencyPair>,
    params: OracleParams,
    pub(crate) written: Mutex<Vec<(CurrencyPair, QuotePrice)>>,
}

impl MockOracleKeeper {
    pub(crate) fn new(pairs: &[&str]) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|pair| pair.parse().expect("test pair must parse"))
                .collect(),
            params: OracleParams::default(),
            written: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn written_prices(&self) -> Vec<(CurrencyPair, QuotePrice)> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl PairRegistry for MockOracleKeeper {
    async fn currency_pairs(&self) -> Result<Vec<CurrencyPair>> {
        Ok(self.pairs.clone())
    }
}

#[async_trait]
impl OracleKeeper for MockOracleKeeper {
    async fn params(&self) -> Result<OracleParams> {
        Ok(self.params)
    }

    async fn set_price(&self, currency_pair: &CurrencyPair, quote: QuotePrice) -> Result<()> {
        self.written
            .lock()
            .unwrap()
            .push((currency_pair.clone(), quote));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockSlaKeeper {
    pub(crate) updates: Mutex<Vec<(u64, Vec<SlaStatusUpdate>)>>,
}

impl MockSlaKeeper {
    pub(crate) fn recorded_updates(&self) -> Vec<(u64, Vec<SlaStatusUpdate>)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl SlaKeeper for MockSlaKeeper {
    async fn record_status_updates(
        &self,
        height: u64,
        updates: Vec<SlaStatusUpdate>,
    ) -> Result<()> {
        self.updates.lock().unwrap().push((height, updates));
        Ok(())
    }
}

pub(crate) struct FailingPreBlocker;

#[async_trait]
impl PreBlocker for FailingPreBlocker {
    async fn pre_block(&self, _request: &request::FinalizeBlock) -> Result<()> {
        Err(eyre!("pre-blocker failure"))
    }
}

pub(crate) struct PanickingPreBlocker;

#[async_trait]
impl PreBlocker for PanickingPreBlocker {
    async fn pre_block(&self, _request: &request::FinalizeBlock) -> Result<()> {
        panic!("pre-blocker panicked");
    }
}

#[derive(Default)]
pub(crate) struct RecordingMetrics {
    latencies: Mutex<Vec<(AbciMethod, Duration)>>,
    outcomes: Mutex<Vec<(AbciMethod, &'static str)>>,
    sizes: Mutex<Vec<(MessageKind, usize)>>,
}

impl RecordingMetrics {
    pub(crate) fn latencies(&self) -> Vec<(AbciMethod, Duration)> {
        self.latencies.lock().unwrap().clone()
    }

    pub(crate) fn outcomes(&self) -> Vec<(AbciMethod, &'static str)> {
        self.outcomes.lock().unwrap().clone()
    }

    pub(crate) fn sizes(&self) -> Vec<(MessageKind, usize)> {
        self.sizes.lock().unwrap().clone()
    }
}

impl Metrics for RecordingMetrics {
    fn observe_abci_method_latency(&self, method: AbciMethod, latency: Duration) {
        self.latencies.lock().unwrap().push((method, latency));
    }

    fn add_abci_request(&self, method: AbciMethod, outcome: &'static str) {
        self.outcomes.lock().unwrap().push((method, outcome));
    }

    fn observe_message_size(&self, kind: MessageKind, size: usize) {
        self.sizes.lock().unwrap().push((kind, size));
    }
}

pub(crate) fn proposer_address() -> account::Id {
    PROPOSER_ADDRESS.parse().unwrap()
}

pub(crate) fn validator_address(seed: u8) -> account::Id {
    account::Id::new([seed; 20])
}

pub(crate) fn new_extend_vote_request() -> request::ExtendVote {
    request::ExtendVote {
        hash: Hash::default(),
        height: BLOCK_HEIGHT.into(),
        time: Time::unix_epoch(),
        txs: vec![],
        proposed_last_commit: Some(CommitInfo {
            round: 0_u8.into(),
            votes: vec![],
        }),
        misbehavior: vec![],
        next_validators_hash: Hash::default(),
        proposer_address: proposer_address(),
    }
}

pub(crate) fn new_verify_request(vote_extension: Vec<u8>) -> request::VerifyVoteExtension {
    request::VerifyVoteExtension {
        hash: Hash::default(),
        validator_address: validator_address(1),
        height: BLOCK_HEIGHT.into(),
        vote_extension: vote_extension.into(),
    }
}

pub(crate) fn new_vote(
    seed: u8,
    power: u8,
    flag: BlockIdFlag,
    vote_extension: Bytes,
) -> ExtendedVoteInfo {
    ExtendedVoteInfo {
        validator: Validator {
            address: [seed; 20],
            power: power.into(),
        },
        sig_info: BlockSignatureInfo::Flag(flag),
        vote_extension,
        extension_signature: None,
    }
}

pub(crate) fn new_extended_commit(votes: Vec<ExtendedVoteInfo>) -> ExtendedCommitInfo {
    ExtendedCommitInfo {
        round: 0_u8.into(),
        votes,
    }
}

pub(crate) fn new_prepare_proposal_request(
    local_last_commit: Option<ExtendedCommitInfo>,
    txs: Vec<Bytes>,
    max_tx_bytes: i64,
) -> request::PrepareProposal {
    request::PrepareProposal {
        txs,
        max_tx_bytes,
        local_last_commit,
        misbehavior: vec![],
        height: BLOCK_HEIGHT.into(),
        time: Time::unix_epoch(),
        next_validators_hash: Hash::default(),
        proposer_address: proposer_address(),
    }
}

pub(crate) fn new_process_proposal_request(txs: Vec<Bytes>) -> request::ProcessProposal {
    request::ProcessProposal {
        txs,
        proposed_last_commit: Some(CommitInfo {
            round: 0_u8.into(),
            votes: vec![],
        }),
        misbehavior: vec![],
        hash: Hash::try_from([1_u8; 32].to_vec()).unwrap(),
        height: BLOCK_HEIGHT.into(),
        next_validators_hash: Hash::default(),
        time: Time::unix_epoch(),
        proposer_address: proposer_address(),
    }
}

pub(crate) fn new_finalize_block_request(height: u8, txs: Vec<Bytes>) -> request::FinalizeBlock {
    request::FinalizeBlock {
        hash: Hash::try_from([2_u8; 32].to_vec()).unwrap(),
        height: height.into(),
        time: Time::unix_epoch(),
        next_validators_hash: Hash::default(),
        proposer_address: proposer_address(),
        decided_last_commit: CommitInfo {
            round: 0_u8.into(),
            votes: vec![],
        },
        misbehavior: vec![],
        txs,
    }
}

/// Encodes a vote extension with the crate's default test codec.
pub(crate) fn encode_vote_extension(
    codec: &dyn argus_core::codec::VoteExtensionCodec,
    prices: BTreeMap<argus_core::types::CurrencyPairId, Vec<u8>>,
) -> Bytes {
    codec
        .encode(&argus_core::vote_extension::OracleVoteExtension {
            prices,
        })
        .unwrap()
}
