//! Client side of the result flow: keep asking for a token's result until it
//! shows up, the lookup fails, or the attempt budget runs out.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::diagnosis::{DiagnosisResult, ResultError};
use crate::models::token::CorrelationToken;

/// Two seconds between lookups, 31 lookups: roughly one minute.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 31;

/// Answer to a single lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(DiagnosisResult),
    NotFound,
}

/// Where a poll session reads results from.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn fetch(&self, token: &CorrelationToken) -> Result<Lookup, PollError>;
}

/// Reads results from the service's query endpoint.
pub struct HttpResultSource {
    http: Client,
    base_url: String,
}

impl HttpResultSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ResultSource for HttpResultSource {
    async fn fetch(&self, token: &CorrelationToken) -> Result<Lookup, PollError> {
        let response = self
            .http
            .get(format!("{}/api/v1/diagnosis/result", self.base_url))
            .query(&[("id", token.as_str())])
            .send()
            .await
            .map_err(PollError::Http)?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await.map_err(PollError::Http)?;
                match DiagnosisResult::from_json_text(&body) {
                    Ok(result) => Ok(Lookup::Found(result)),
                    // An empty body is not an answer yet.
                    Err(ResultError::Empty) => Ok(Lookup::NotFound),
                    Err(ResultError::Malformed(e)) => Err(PollError::InvalidBody(e)),
                }
            }
            StatusCode::NOT_FOUND => Ok(Lookup::NotFound),
            status => Err(PollError::Status(status.as_u16())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Result lookup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Result lookup answered with status {0}")]
    Status(u16),

    #[error("Result body is not valid JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PollState {
    Waiting,
    ResultFound,
    Error,
    TimedOut,
    Cancelled,
}

/// How a poll session ended. `attempts` counts lookups actually issued.
#[derive(Debug)]
pub enum PollOutcome {
    Found { result: DiagnosisResult, attempts: u32 },
    Failed { error: PollError, attempts: u32 },
    /// Recover by starting a new job; the same token will not come back faster.
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn state(&self) -> PollState {
        match self {
            PollOutcome::Found { .. } => PollState::ResultFound,
            PollOutcome::Failed { .. } => PollState::Error,
            PollOutcome::TimedOut { .. } => PollState::TimedOut,
            PollOutcome::Cancelled { .. } => PollState::Cancelled,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Found { attempts, .. }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// One consumer waiting on one token. The attempt counter belongs to the
/// session, so sessions on different tokens never share retry state.
#[derive(Debug)]
pub struct PollSession {
    token: CorrelationToken,
    policy: PollPolicy,
    attempts: u32,
    state: PollState,
}

impl PollSession {
    /// A zero interval or attempt budget is raised to the smallest usable value.
    pub fn new(token: CorrelationToken, policy: PollPolicy) -> Self {
        let policy = PollPolicy {
            interval: policy.interval.max(Duration::from_millis(1)),
            max_attempts: policy.max_attempts.max(1),
        };
        Self {
            token,
            policy,
            attempts: 0,
            state: PollState::Waiting,
        }
    }

    pub fn token(&self) -> &CorrelationToken {
        &self.token
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Drive the session to a terminal state.
    ///
    /// The first lookup goes out immediately. A lookup is cut off after one
    /// interval and counts as a miss; ticks missed meanwhile are skipped, so
    /// requests never pile up. Once `cancel` fires no further lookup is sent.
    pub async fn run<S>(&mut self, source: &S, cancel: &CancellationToken) -> PollOutcome
    where
        S: ResultSource + ?Sized,
    {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            if self.attempts >= self.policy.max_attempts {
                tracing::warn!(token = %self.token, attempts = self.attempts, "Gave up waiting for diagnosis result");
                break PollOutcome::TimedOut {
                    attempts: self.attempts,
                };
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled { attempts: self.attempts },
                _ = ticker.tick() => {}
            }

            self.attempts += 1;
            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled { attempts: self.attempts },
                lookup = tokio::time::timeout(self.policy.interval, source.fetch(&self.token)) => lookup,
            };

            match lookup {
                Ok(Ok(Lookup::Found(result))) => {
                    tracing::info!(token = %self.token, attempts = self.attempts, "Diagnosis result received");
                    break PollOutcome::Found {
                        result,
                        attempts: self.attempts,
                    };
                }
                Ok(Ok(Lookup::NotFound)) => {
                    tracing::debug!(token = %self.token, attempt = self.attempts, "Diagnosis result not ready");
                }
                Ok(Err(error)) => {
                    tracing::error!(token = %self.token, attempt = self.attempts, error = %error, "Result lookup failed");
                    break PollOutcome::Failed {
                        error,
                        attempts: self.attempts,
                    };
                }
                Err(_) => {
                    tracing::warn!(token = %self.token, attempt = self.attempts, "Result lookup stalled past the poll interval");
                }
            }
        };

        self.state = outcome.state();
        outcome
    }
}
