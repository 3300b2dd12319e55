//! Connection to a chain-access JSON-RPC endpoint.
//!
//! Every remote call goes through [`Connection::request`] (or [`Connection::with_timeout`]), which
//! bounds it by the configured RPC timeout and maps failures onto [`ChainError`]. The transport is
//! released when the connection is closed or dropped.

use std::future::Future;
use std::time::Duration;

use common::{ChainError, ChainId, ChainResult};
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use tokio::time::timeout;
use url::Url;

pub struct Connection<P = Http>
where
    P: JsonRpcClient,
{
    provider: Option<Provider<P>>,
    endpoint: String,
    /// `scheme://host[:port]` of the endpoint, the only part that is logged.
    host: String,
    /// Chain ID reported by the endpoint when the connection was opened.
    chain_id: ChainId,
    rpc_timeout: Duration,
}

impl Connection<Http> {
    /// Opens an HTTP(S) connection and asks the endpoint for its chain ID.
    pub async fn open(endpoint: &str, rpc_timeout: Duration) -> ChainResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| ChainError::Connection(format!("Invalid RPC URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ChainError::Connection(format!(
                "Unsupported RPC URL '{}': expected http:// or https:// with a host",
                endpoint_host(endpoint)
            )));
        }

        let provider = Provider::<Http>::try_from(url.as_str()).map_err(|e| {
            ChainError::Connection(format!(
                "Invalid RPC URL '{}': {}",
                endpoint_host(endpoint),
                e
            ))
        })?;

        Self::open_with(provider, endpoint, rpc_timeout).await
    }
}

impl<P> Connection<P>
where
    P: JsonRpcClient,
{
    /// Opens a connection over an already constructed provider. The endpoint must answer a chain
    /// ID query within `rpc_timeout`, otherwise it is considered unreachable.
    pub async fn open_with(
        provider: Provider<P>,
        endpoint: impl Into<String>,
        rpc_timeout: Duration,
    ) -> ChainResult<Self> {
        let endpoint = endpoint.into();
        let host = endpoint_host(&endpoint);

        let raw_chain_id = match timeout(rpc_timeout, provider.get_chainid()).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                return Err(ChainError::Connection(format!(
                    "Endpoint {} is unreachable: {}",
                    host,
                    scrub_endpoint(&e, &endpoint, &host)
                )))
            }
            Err(_) => {
                return Err(ChainError::Connection(format!(
                    "Endpoint {} did not answer within {:?}",
                    host, rpc_timeout
                )))
            }
        };
        let chain_id = to_chain_id(raw_chain_id)
            .map_err(|e| ChainError::Connection(format!("Endpoint {}: {}", host, e)))?;

        info!("Connected to {} (chain id {})", host, chain_id);

        Ok(Self {
            provider: Some(provider),
            endpoint,
            host,
            chain_id,
            rpc_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Chain ID observed at open. Transactions submitted through this connection must be signed
    /// for it.
    pub fn network_chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.provider.is_none()
    }

    pub fn provider(&self) -> ChainResult<&Provider<P>> {
        self.provider.as_ref().ok_or_else(|| {
            ChainError::Connection(format!("Connection to {} is closed", self.host))
        })
    }

    /// Releases the transport. Safe to call more than once.
    pub fn close(&mut self) {
        if self.provider.take().is_some() {
            info!("Closed connection to {}", self.host);
        }
    }

    /// Awaits `fut` for at most the RPC timeout. The provider's own result is handed back
    /// untouched so callers can classify RPC errors themselves.
    pub async fn with_timeout<T, F>(
        &self,
        what: &str,
        fut: F,
    ) -> ChainResult<Result<T, ProviderError>>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.rpc_timeout, fut).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!("RPC timeout after {:?}: {}", self.rpc_timeout, what);
                Err(ChainError::Network(format!(
                    "{}: no answer within {:?}",
                    what, self.rpc_timeout
                )))
            }
        }
    }

    /// Like [`Connection::with_timeout`], with any provider error reported as a network error.
    pub async fn request<T, F>(&self, what: &str, fut: F) -> ChainResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        debug!("RPC request: {}", what);

        self.with_timeout(what, fut).await?.map_err(|e| {
            let e = self.scrub(&e);
            warn!("RPC error ({}): {}", what, e);
            ChainError::Network(format!("{}: {}", what, e))
        })
    }

    /// Renders `error` with the full endpoint URL replaced by its host. Transport errors quote the
    /// URL they failed on.
    pub fn scrub(&self, error: &dyn std::fmt::Display) -> String {
        scrub_endpoint(error, &self.endpoint, &self.host)
    }

    /// Queries the endpoint's chain ID.
    pub async fn chain_identifier(&self) -> ChainResult<ChainId> {
        let id = self
            .request("chain id", self.provider()?.get_chainid())
            .await?;

        to_chain_id(id)
    }

    pub fn verify_chain_id(&self, expected: ChainId) -> ChainResult<()> {
        if self.chain_id != expected {
            return Err(ChainError::ChainMismatch {
                expected: expected.0,
                actual: self.chain_id.0,
            });
        }
        Ok(())
    }

    /// Latest balance of `address`, in wei.
    pub async fn balance_of(&self, address: Address) -> ChainResult<U256> {
        self.request("balance", self.provider()?.get_balance(address, None))
            .await
    }
}

impl<P> Drop for Connection<P>
where
    P: JsonRpcClient,
{
    fn drop(&mut self) {
        self.close();
    }
}

impl<P> std::fmt::Debug for Connection<P>
where
    P: JsonRpcClient,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.host)
            .field("chain_id", &self.chain_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn to_chain_id(id: U256) -> ChainResult<ChainId> {
    if id > U256::from(u64::MAX) {
        return Err(ChainError::Network(format!("Chain ID {} out of range", id)));
    }
    Ok(ChainId(id.as_u64()))
}

fn scrub_endpoint(error: &dyn std::fmt::Display, endpoint: &str, host: &str) -> String {
    let mut text = error.to_string();
    if let Ok(url) = Url::parse(endpoint) {
        text = text.replace(url.as_str(), host);
    }
    text.replace(endpoint, host)
}

/// Scheme, host and port of an endpoint URL. Hosted endpoints carry API keys in the path or in
/// the userinfo, so only this part is ever logged.
pub fn endpoint_host(endpoint: &str) -> String {
    let Ok(url) = Url::parse(endpoint) else {
        return "<invalid URL>".to_string();
    };

    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", url.scheme(), host, port),
        (Some(host), None) => format!("{}://{}", url.scheme(), host),
        (None, _) => format!("{}://", url.scheme()),
    }
}
