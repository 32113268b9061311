//! Forwarding of API requests to node agents over the tunnel
//!
//! Every relay starts by resolving the node's tunnel address from the node
//! directory. Nothing is cached: a removed node fails immediately.

pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::db::{DirectoryError, NodeDirectory};
use crate::telemetry::timed;

pub use stream::RelayStream;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("query parameter 'path' is required")]
    MissingPath,

    #[error("node agent unreachable: {0}")]
    Unreachable(String),

    #[error("node agent did not answer within {0}")]
    Timeout(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Request headers that describe the caller's connection, not the request
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Control-API credentials; agents never see them
const CALLER_CREDENTIALS: [HeaderName; 2] = [header::AUTHORIZATION, header::COOKIE];

/// Inbound request to hand to an agent unchanged
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Agent answer, copied through byte for byte
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct TunnelRelay {
    directory: Arc<dyn NodeDirectory>,
    client: reqwest::Client,
    stream_client: reqwest::Client,
    agent_port: u16,
    timeout: Duration,
}

impl TunnelRelay {
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        agent_port: u16,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        // Event streams may idle for as long as the agent likes
        let stream_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            directory,
            client,
            stream_client,
            agent_port,
            timeout,
        })
    }

    async fn resolve(&self, node_id: &str) -> Result<String, RelayError> {
        self.directory
            .find_by_id(node_id)
            .await?
            .map(|node| node.tunnel_address)
            .ok_or_else(|| RelayError::NodeNotFound(node_id.to_string()))
    }

    fn agent_url(&self, tunnel_address: &str, path: &str) -> String {
        format!("http://{}:{}{}", tunnel_address, self.agent_port, path)
    }

    /// Buffered round trip bounded by the relay timeout.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn relay(
        &self,
        node_id: &str,
        request: RelayRequest,
    ) -> Result<RelayResponse, RelayError> {
        timed("relay", self.forward(node_id, request)).await
    }

    async fn forward(
        &self,
        node_id: &str,
        request: RelayRequest,
    ) -> Result<RelayResponse, RelayError> {
        let path = normalize_path(&request.path)?;
        let address = self.resolve(node_id).await?;
        let url = self.agent_url(&address, &path);
        debug!(url = %url, "Relaying request to agent");

        let response = self
            .client
            .request(request.method, &url)
            .headers(forwardable_headers(&request.headers))
            .body(request.body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        debug!(status = %status, bytes = body.len(), "Agent answered");

        Ok(RelayResponse {
            status,
            headers,
            body,
        })
    }

    /// Open a line-by-line relay of an agent event stream.
    ///
    /// The returned stream stops when the agent closes, when `cancel` fires,
    /// or when it is dropped; in every case the agent connection is closed.
    #[instrument(skip(self, cancel))]
    pub async fn relay_stream(
        &self,
        node_id: &str,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<RelayStream, RelayError> {
        timed("relay_stream", self.open_stream(node_id, path, cancel)).await
    }

    async fn open_stream(
        &self,
        node_id: &str,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<RelayStream, RelayError> {
        let path = normalize_path(path)?;
        let address = self.resolve(node_id).await?;
        let url = self.agent_url(&address, &path);
        debug!(url = %url, "Opening agent event stream");

        let response = self
            .stream_client
            .get(&url)
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Agent answered event stream with an error status");
        }

        Ok(RelayStream::spawn(node_id, response, cancel.child_token()))
    }

    fn transport_error(&self, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::Timeout(format!("{:?}", self.timeout))
        } else {
            RelayError::Unreachable(err.to_string())
        }
    }
}

/// Non-empty agent path with a leading slash
fn normalize_path(path: &str) -> Result<String, RelayError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(RelayError::MissingPath);
    }
    if path.starts_with('/') {
        Ok(path.to_string())
    } else {
        Ok(format!("/{}", path))
    }
}

fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP.iter().chain(CALLER_CREDENTIALS.iter()) {
        forwarded.remove(name);
    }
    forwarded.remove(header::HOST);
    // Recomputed from the relayed body
    forwarded.remove(header::CONTENT_LENGTH);
    forwarded
}
