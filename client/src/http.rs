//! HTTP remote speaking the `/sync` wire contract.

use crate::{
    config::SyncConfig,
    error::{Result, SyncError},
    remote::Remote,
};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use tether_engine::{
    protocol::{PullParams, PushParams},
    ChangeSet, PullRequest, PullResponse, PushOutcome, Timestamp,
};

/// Remote authority reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    sync_url: String,
}

impl HttpRemote {
    /// Remote at `config.endpoint`. Request deadlines are left to the
    /// coordinator.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, &config.endpoint))
    }

    /// Remote at `endpoint` using a preconfigured client.
    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            sync_url: format!("{}/sync", endpoint.trim_end_matches('/')),
        }
    }

    pub fn sync_url(&self) -> &str {
        &self.sync_url
    }
}

async fn server_error(response: Response) -> SyncError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    SyncError::Server { status, message }
}

/// Push outcome from a response body; an empty body means accepted.
fn parse_outcome(body: &[u8]) -> Result<PushOutcome> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PushOutcome::accepted());
    }
    serde_json::from_slice(body).map_err(|e| SyncError::Protocol(format!("push response: {e}")))
}

#[async_trait]
impl Remote for HttpRemote {
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse> {
        let params = PullParams::try_from(request)?;
        let response = self.client.get(&self.sync_url).query(&params).send().await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| SyncError::Protocol(format!("pull response: {e}")))
    }

    async fn push(&self, changes: &ChangeSet, last_pulled_at: Timestamp) -> Result<PushOutcome> {
        let response = self
            .client
            .post(&self.sync_url)
            .query(&PushParams { last_pulled_at })
            .json(changes)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => parse_outcome(&response.bytes().await?),
            StatusCode::CONFLICT => {
                let outcome = parse_outcome(&response.bytes().await?)?;
                if outcome.is_accepted() {
                    return Err(SyncError::Protocol(
                        "409 without rejected records".to_string(),
                    ));
                }
                Ok(outcome)
            }
            _ => Err(server_error(response).await),
        }
    }
}
