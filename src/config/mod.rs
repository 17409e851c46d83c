use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Externally reachable base URL of this service; callback addresses are
    /// built from it.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// SORACOM Flux incoming webhook that accepts keyed diagnosis jobs
    pub flux_webhook_url: String,

    /// Incoming webhook for the single-slot flow. Defaults to `flux_webhook_url`.
    pub flux_slot_webhook_url: Option<String>,

    /// Optional `X-Soracom-API-Key` header value
    pub flux_api_key: Option<String>,

    /// Optional `X-Soracom-Token` header value
    pub flux_token: Option<String>,

    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    /// Age after which stored entries, pending or resolved, are dropped
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Shared secret callbacks must present in `X-Webhook-Secret`. Unset means
    /// callbacks are not authenticated.
    pub webhook_secret: Option<String>,

    /// Upper bound for the `timeoutSecs` of the wait endpoint
    #[serde(default = "default_long_poll_max_secs")]
    pub long_poll_max_secs: u64,

    /// Bucket for uploaded photos. Uploads are disabled without bucket and keys.
    pub s3_bucket: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3-compatible endpoint (R2, MinIO). Unset means AWS.
    pub s3_endpoint: Option<String>,

    pub s3_access_key: Option<String>,

    pub s3_secret_key: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_dispatch_timeout_secs() -> u64 {
    10
}

fn default_result_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_long_poll_max_secs() -> u64 {
    30
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn long_poll_max(&self) -> Duration {
        Duration::from_secs(self.long_poll_max_secs)
    }

    pub fn slot_webhook_url(&self) -> &str {
        self.flux_slot_webhook_url
            .as_deref()
            .unwrap_or(&self.flux_webhook_url)
    }

    /// Callback address for a route path such as `/api/v1/diagnosis/callback`.
    pub fn callback_address(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }
}

/// Settings of the `poll` command-line client.
#[derive(Debug, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_max_attempts() -> u32 {
    31
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// At least one millisecond; a zero period cannot drive a ticker.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// At least one lookup per session.
    pub fn max_attempts(&self) -> u32 {
        self.poll_max_attempts.max(1)
    }
}
