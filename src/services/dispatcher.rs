use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::models::job::JobRequest;

/// Outbound link to the external diagnosis processor. `dispatch` returns once
/// the processor has accepted the job; the diagnosis arrives later through the
/// callback endpoint.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, request: &JobRequest) -> Result<(), DispatchError>;
}

/// Client for a SORACOM Flux incoming webhook.
pub struct FluxClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    token: Option<String>,
}

impl FluxClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<&str>,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DispatchError::Http)?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.map(str::to_string),
            token: token.map(str::to_string),
        })
    }
}

#[async_trait]
impl JobDispatcher for FluxClient {
    async fn dispatch(&self, request: &JobRequest) -> Result<(), DispatchError> {
        let mut call = self.http.post(&self.endpoint).json(request);
        if let Some(api_key) = &self.api_key {
            call = call.header("X-Soracom-API-Key", api_key);
        }
        if let Some(token) = &self.token {
            call = call.header("X-Soracom-Token", token);
        }

        let response = call.send().await.map_err(DispatchError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP request to diagnosis processor failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Diagnosis processor rejected the job with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Diagnosis processor did not acknowledge within {0:?}")]
    Timeout(Duration),
}
