use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{PeerNode, RemoteFailure, RemoteOperation, RemoteOutcome};
use crate::api::error::ErrorBody;
use crate::auth::{issue_token, Principal};

pub const RPC_PATH: &str = "/internal/v1/rpc";

/// Point-to-point request/response to a single peer. Timeouts and
/// cancellation are the transport's business.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn call(&self, peer: &PeerNode, operation: &RemoteOperation) -> Result<RemoteOutcome, RemoteFailure>;
}

/// JSON over HTTP to the peer's internal RPC endpoint, authenticated as the
/// cluster principal.
pub struct HttpTransport {
    client: reqwest::Client,
    jwt_secret: String,
    token_ttl: Duration,
}

impl HttpTransport {
    pub fn new(jwt_secret: impl Into<String>, timeout: Duration, token_ttl: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            jwt_secret: jwt_secret.into(),
            token_ttl,
        })
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn call(&self, peer: &PeerNode, operation: &RemoteOperation) -> Result<RemoteOutcome, RemoteFailure> {
        let url = format!("{}{}", peer.address.trim_end_matches('/'), RPC_PATH);
        let token = issue_token(&self.jwt_secret, &Principal::cluster(), self.token_ttl)
            .map_err(|e| RemoteFailure::unreachable(format!("cannot sign cluster token: {}", e)))?;

        debug!(node = %peer.name, url = %url, op = operation.name(), "Sending cluster RPC");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(operation)
            .send()
            .await
            .map_err(|e| RemoteFailure::unreachable(format!("{} unreachable: {}", peer.name, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<RemoteOutcome>()
                .await
                .map_err(|e| RemoteFailure::unreachable(format!("malformed reply from {}: {}", peer.name, e)));
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(RemoteFailure {
                kind: Some(body.error),
                message: body.message,
            }),
            Err(_) => Err(RemoteFailure::unreachable(format!(
                "{} answered HTTP {}",
                peer.name, status
            ))),
        }
    }
}
