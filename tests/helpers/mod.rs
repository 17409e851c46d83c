//! Test helpers: the service on an ephemeral port, a fake diagnosis processor
//! and an in-memory photo store.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use outfit_diagnosis::app_state::AppState;
use outfit_diagnosis::routes::{self, CALLBACK_PATH, SLOT_CALLBACK_PATH};
use outfit_diagnosis::services::initiator::{CorrelationMode, JobInitiator};
use outfit_diagnosis::services::result_store::{InMemoryResultStore, ResultStore};
use outfit_diagnosis::services::storage::{ImageStorage, StorageError};
use outfit_diagnosis::services::dispatcher::FluxClient;
use serde_json::Value;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const WEBHOOK_SECRET: &str = "test-secret";

/// Stand-in for the SORACOM Flux webhook: records every job it receives,
/// answers with a configurable status, and can post a result back to the
/// job's callback address after a delay.
#[derive(Clone)]
pub struct FakeProcessor {
    pub url: String,
    inner: Arc<ProcessorState>,
}

struct ProcessorState {
    jobs: Mutex<Vec<Value>>,
    status: AtomicU16,
    reply: Mutex<Option<(Value, Duration)>>,
    http: reqwest::Client,
}

impl FakeProcessor {
    pub async fn spawn() -> Self {
        let inner = Arc::new(ProcessorState {
            jobs: Mutex::new(Vec::new()),
            status: AtomicU16::new(200),
            reply: Mutex::new(None),
            http: reqwest::Client::new(),
        });
        let app = Router::new()
            .route("/in", post(accept_job))
            .with_state(inner.clone());
        let base = serve(app).await;
        Self {
            url: format!("{}/in", base),
            inner,
        }
    }

    pub fn respond_with(&self, status: u16) {
        self.inner.status.store(status, Ordering::SeqCst);
    }

    /// Deliver `result` to the callback address of every accepted job.
    pub fn reply_after(&self, result: Value, delay: Duration) {
        *self.inner.reply.lock().unwrap() = Some((result, delay));
    }

    pub fn jobs(&self) -> Vec<Value> {
        self.inner.jobs.lock().unwrap().clone()
    }
}

async fn accept_job(State(state): State<Arc<ProcessorState>>, Json(job): Json<Value>) -> StatusCode {
    state.jobs.lock().unwrap().push(job.clone());
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();

    let reply = state.reply.lock().unwrap().clone();
    if let (true, Some((result, delay))) = (status.is_success(), reply) {
        let http = state.http.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let callback = job["content"]["callbackAddress"].as_str().unwrap().to_string();
            let body = serde_json::json!({
                "diagnosisId": job["correlationToken"],
                "result": result,
            });
            http.post(callback)
                .header("X-Webhook-Secret", WEBHOOK_SECRET)
                .json(&body)
                .send()
                .await
                .unwrap();
        });
    }
    status
}

/// Photo store that keeps uploads in memory.
#[derive(Default)]
pub struct MemoryStorage {
    pub objects: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl ImageStorage for MemoryStorage {
    async fn put_image(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), data.len(), content_type.to_string()));
        Ok(format!("memory://{}", key))
    }
}

pub struct TestApp {
    pub base_url: String,
    pub store: Arc<InMemoryResultStore>,
    pub client: reqwest::Client,
}

pub struct TestAppOptions {
    pub webhook_secret: Option<String>,
    pub storage: Option<Arc<MemoryStorage>>,
    pub dispatch_timeout: Duration,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            storage: None,
            dispatch_timeout: Duration::from_secs(5),
        }
    }
}

impl TestApp {
    pub async fn spawn(processor: &FakeProcessor) -> Self {
        Self::spawn_with(processor, TestAppOptions::default()).await
    }

    pub async fn spawn_with(processor: &FakeProcessor, options: TestAppOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let store = Arc::new(InMemoryResultStore::new(Duration::from_secs(600)));
        let shared: Arc<dyn ResultStore> = store.clone();

        let dispatcher = |timeout| Arc::new(FluxClient::new(&processor.url, None, None, timeout).unwrap());
        let initiator = JobInitiator::new(
            dispatcher(options.dispatch_timeout),
            shared.clone(),
            format!("{}{}", base_url, CALLBACK_PATH),
            CorrelationMode::Keyed,
            options.dispatch_timeout,
        );
        let slot_initiator = JobInitiator::new(
            dispatcher(options.dispatch_timeout),
            shared.clone(),
            format!("{}{}", base_url, SLOT_CALLBACK_PATH),
            CorrelationMode::SingleSlot,
            options.dispatch_timeout,
        );

        let storage = options.storage.map(|s| s as Arc<dyn ImageStorage>);
        let state = AppState::new(
            shared,
            initiator,
            slot_initiator,
            storage,
            options.webhook_secret,
            Duration::from_secs(5),
        );

        let app = routes::router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            client: reqwest::Client::new(),
        }
    }

    pub async fn initiate(&self, image_url: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/v1/diagnosis", self.base_url))
            .json(&serde_json::json!({ "imageUrl": image_url, "tags": ["commute"] }))
            .send()
            .await
            .unwrap()
    }

    pub async fn query(&self, id: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .get(format!("{}/api/v1/diagnosis/result", self.base_url));
        if let Some(id) = id {
            request = request.query(&[("id", id)]);
        }
        request.send().await.unwrap()
    }

    pub async fn callback(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, CALLBACK_PATH))
            .json(body)
            .send()
            .await
            .unwrap()
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base_url
}
