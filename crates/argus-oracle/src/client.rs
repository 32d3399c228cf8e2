use std::time::Duration;

use argus_core::generated::argus::oracle::v1::{
    oracle_client::OracleClient as RawOracleClient,
    QueryPricesRequest,
    QueryPricesResponse,
};
use async_trait::async_trait;
use tonic::transport::Channel;

#[derive(Debug, thiserror::Error)]
pub enum OracleClientError {
    #[error("oracle sidecar RPC failed")]
    Rpc(#[from] tonic::Status),
    #[error("oracle sidecar did not respond within {timeout:?}")]
    DeadlineExceeded { timeout: Duration },
}

/// Handle to the in-process oracle daemon.
///
/// `Ok(None)` models a daemon that is up but has nothing to report; callers
/// must treat it as "no prices available", not as a failure.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn prices(&self) -> Result<Option<QueryPricesResponse>, OracleClientError>;
}

/// Oracle client backed by the sidecar's gRPC service.
#[derive(Debug, Clone)]
pub struct GrpcOracleClient {
    inner: RawOracleClient<Channel>,
}

impl GrpcOracleClient {
    /// Connects to the oracle sidecar at the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or the connection cannot
    /// be established.
    pub async fn connect(endpoint: String) -> Result<Self, tonic::transport::Error> {
        Ok(Self {
            inner: RawOracleClient::connect(endpoint).await?,
        })
    }

    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: RawOracleClient::new(channel),
        }
    }
}

#[async_trait]
impl OracleClient for GrpcOracleClient {
    async fn prices(&self) -> Result<Option<QueryPricesResponse>, OracleClientError> {
        // tonic clients are cheap to clone; the underlying channel is shared.
        let mut client = self.inner.clone();
        let response = client.prices(QueryPricesRequest {}).await?;
        Ok(Some(response.into_inner()))
    }
}
