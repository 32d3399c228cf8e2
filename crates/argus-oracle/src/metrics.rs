use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

/// Metrics outcome label reported for a request that completed without a
/// surfaced error.
pub const SUCCESS_LABEL: &str = "success";

const ABCI_METHOD_LATENCY_SECONDS: &str = "argus_oracle_abci_method_latency_seconds";
const ABCI_REQUESTS: &str = "argus_oracle_abci_requests";
const MESSAGE_SIZE_BYTES: &str = "argus_oracle_message_size_bytes";

/// The ABCI++ hooks instrumented by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbciMethod {
    ExtendVote,
    VerifyVoteExtension,
    PrepareProposal,
    ProcessProposal,
    PreBlock,
}

impl AbciMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExtendVote => "extend_vote",
            Self::VerifyVoteExtension => "verify_vote_extension",
            Self::PrepareProposal => "prepare_proposal",
            Self::ProcessProposal => "process_proposal",
            Self::PreBlock => "pre_block",
        }
    }
}

impl std::fmt::Display for AbciMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of wire messages whose sizes are observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    VoteExtension,
    ExtendedCommit,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VoteExtension => "vote_extension",
            Self::ExtendedCommit => "extended_commit",
        }
    }
}

/// Sink for handler telemetry. All operations are non-blocking and
/// failure-silent.
pub trait Metrics: Send + Sync {
    fn observe_abci_method_latency(&self, method: AbciMethod, latency: Duration);

    /// Records one request outcome. `outcome` is [`SUCCESS_LABEL`] or the
    /// stable label of a surfaced error kind.
    fn add_abci_request(&self, method: AbciMethod, outcome: &'static str);

    fn observe_message_size(&self, kind: MessageKind, size: usize);
}

/// Metrics sink backed by the `metrics` crate facade, exporting through
/// whatever recorder the embedding process installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryMetrics;

impl Metrics for TelemetryMetrics {
    fn observe_abci_method_latency(&self, method: AbciMethod, latency: Duration) {
        metrics::histogram!(ABCI_METHOD_LATENCY_SECONDS, "method" => method.as_str())
            .record(latency.as_secs_f64());
    }

    fn add_abci_request(&self, method: AbciMethod, outcome: &'static str) {
        metrics::counter!(
            ABCI_REQUESTS,
            "method" => method.as_str(),
            "outcome" => outcome,
        )
        .increment(1);
    }

    fn observe_message_size(&self, kind: MessageKind, size: usize) {
        let size = u32::try_from(size).unwrap_or(u32::MAX);
        metrics::histogram!(MESSAGE_SIZE_BYTES, "kind" => kind.as_str()).record(f64::from(size));
    }
}

/// A metrics sink that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn observe_abci_method_latency(&self, _method: AbciMethod, _latency: Duration) {}

    fn add_abci_request(&self, _method: AbciMethod, _outcome: &'static str) {}

    fn observe_message_size(&self, _kind: MessageKind, _size: usize) {}
}

/// Scoped latency/outcome observation for one handler invocation.
///
/// Dropping the observation records the latency and exactly one outcome tag,
/// whatever the exit path. The outcome defaults to the panic label so that
/// an unwind past the guard is still accounted for.
pub(crate) struct MethodObservation {
    metrics: Arc<dyn Metrics>,
    method: AbciMethod,
    started_at: Instant,
    outcome: &'static str,
}

impl MethodObservation {
    pub(crate) fn new(metrics: Arc<dyn Metrics>, method: AbciMethod) -> Self {
        Self {
            metrics,
            method,
            started_at: Instant::now(),
            outcome: "panic",
        }
    }

    pub(crate) fn set_outcome(&mut self, outcome: &'static str) {
        self.outcome = outcome;
    }
}

impl Drop for MethodObservation {
    fn drop(&mut self) {
        self.metrics
            .observe_abci_method_latency(self.method, self.started_at.elapsed());
        self.metrics.add_abci_request(self.method, self.outcome);
    }
}
