use std::sync::Arc;
use std::time::Duration;

use crate::models::job::JobRequest;
use crate::models::token::CorrelationToken;
use crate::services::dispatcher::{DispatchError, JobDispatcher};
use crate::services::result_store::{ResultStore, StoreError};

/// How results of a flow are keyed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CorrelationMode {
    /// Fresh random token per job.
    Keyed,
    /// Every job shares one constant key; concurrent jobs overwrite each other.
    SingleSlot,
}

/// Starts diagnosis jobs on the external processor and hands back the token
/// their result will be stored under.
pub struct JobInitiator {
    dispatcher: Arc<dyn JobDispatcher>,
    store: Arc<dyn ResultStore>,
    callback_address: String,
    mode: CorrelationMode,
    dispatch_timeout: Duration,
}

impl JobInitiator {
    pub fn new(
        dispatcher: Arc<dyn JobDispatcher>,
        store: Arc<dyn ResultStore>,
        callback_address: String,
        mode: CorrelationMode,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            store,
            callback_address,
            mode,
            dispatch_timeout,
        }
    }

    /// Dispatch a job for an uploaded image.
    ///
    /// The token is registered as pending only after the processor
    /// acknowledges the job. On failure a keyed token is abandoned, so even a
    /// result the processor delivers for it later is never served.
    pub async fn initiate(
        &self,
        image_reference: String,
        tags: Vec<String>,
    ) -> Result<CorrelationToken, InitiateError> {
        let token = match self.mode {
            CorrelationMode::Keyed => CorrelationToken::generate(),
            CorrelationMode::SingleSlot => {
                let token = CorrelationToken::single_slot();
                if self.store.is_pending(&token)? {
                    tracing::warn!(
                        "Single-slot job started while the previous one is still pending; \
                         its result will be overwritten"
                    );
                }
                token
            }
        };

        let request = JobRequest::new(
            token.clone(),
            image_reference,
            tags,
            self.callback_address.clone(),
        );

        let dispatched = tokio::time::timeout(self.dispatch_timeout, self.dispatcher.dispatch(&request))
            .await
            .unwrap_or(Err(DispatchError::Timeout(self.dispatch_timeout)));

        if let Err(e) = dispatched {
            metrics::counter!("diagnosis_dispatch_failures_total").increment(1);
            tracing::error!(token = %token, mode = %self.mode, error = %e, "Diagnosis dispatch failed");
            // The slot key is shared with earlier jobs and is not tombstoned.
            if self.mode == CorrelationMode::Keyed {
                self.store.abandon(&token)?;
            }
            return Err(InitiateError::Dispatch(e));
        }

        self.store.register(&token)?;
        metrics::counter!("diagnosis_jobs_dispatched_total").increment(1);
        tracing::info!(
            token = %token,
            mode = %self.mode,
            image = %request.content.file_reference,
            tags = request.content.tags.len(),
            "Diagnosis job dispatched"
        );

        Ok(token)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitiateError {
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::diagnosis::DiagnosisResult;
    use crate::services::result_store::InMemoryResultStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<JobRequest>>,
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: &JobRequest) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct RejectingDispatcher {
        sent: Mutex<Vec<CorrelationToken>>,
    }

    #[async_trait]
    impl JobDispatcher for RejectingDispatcher {
        async fn dispatch(&self, request: &JobRequest) -> Result<(), DispatchError> {
            self.sent.lock().unwrap().push(request.correlation_token.clone());
            Err(DispatchError::Rejected {
                status: 503,
                body: "busy".to_string(),
            })
        }
    }

    struct StalledDispatcher;

    #[async_trait]
    impl JobDispatcher for StalledDispatcher {
        async fn dispatch(&self, _request: &JobRequest) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn store() -> Arc<InMemoryResultStore> {
        Arc::new(InMemoryResultStore::new(Duration::from_secs(600)))
    }

    fn initiator(
        dispatcher: Arc<dyn JobDispatcher>,
        store: Arc<InMemoryResultStore>,
        mode: CorrelationMode,
    ) -> JobInitiator {
        JobInitiator::new(
            dispatcher,
            store,
            "http://localhost:3000/api/v1/diagnosis/callback".to_string(),
            mode,
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_initiate_registers_pending_token() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let store = store();
        let initiator = initiator(dispatcher.clone(), store.clone(), CorrelationMode::Keyed);

        let token = initiator
            .initiate("https://bucket/clothes/1.jpg".to_string(), vec!["coat".to_string()])
            .await
            .unwrap();

        assert!(store.is_pending(&token).unwrap());
        assert_eq!(store.get(&token).unwrap(), None);

        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].correlation_token, token);
        assert_eq!(sent[0].content.file_reference, "https://bucket/clothes/1.jpg");
        assert_eq!(
            sent[0].content.callback_address,
            "http://localhost:3000/api/v1/diagnosis/callback"
        );
    }

    #[tokio::test]
    async fn test_tokens_are_unique_across_jobs() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let initiator = initiator(dispatcher, store(), CorrelationMode::Keyed);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let token = initiator.initiate("img".to_string(), Vec::new()).await.unwrap();
            assert!(seen.insert(token));
        }
    }

    #[tokio::test]
    async fn test_failed_dispatch_registers_nothing() {
        let dispatcher = Arc::new(RejectingDispatcher {
            sent: Mutex::new(Vec::new()),
        });
        let store = store();
        let initiator = initiator(dispatcher.clone(), store.clone(), CorrelationMode::Keyed);

        let err = initiator.initiate("img".to_string(), Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            InitiateError::Dispatch(DispatchError::Rejected { status: 503, .. })
        ));

        let attempted = dispatcher.sent.lock().unwrap()[0].clone();
        assert!(!store.is_pending(&attempted).unwrap());
        assert_eq!(store.get(&attempted).unwrap(), None);
        assert_eq!(store.stats().unwrap().pending, 0);

        // The processor still knows the token and may call back anyway.
        store
            .put(&attempted, DiagnosisResult::from_json_text(r#"{"recommendation":"coat"}"#).unwrap())
            .unwrap();
        assert_eq!(store.get(&attempted).unwrap(), None);
        assert_eq!(store.stats().unwrap(), Default::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_dispatch_times_out() {
        let store = store();
        let initiator = initiator(Arc::new(StalledDispatcher), store.clone(), CorrelationMode::Keyed);

        let err = initiator.initiate("img".to_string(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, InitiateError::Dispatch(DispatchError::Timeout(_))));
        assert_eq!(store.stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_single_slot_reuses_constant_key() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let store = store();
        let initiator = initiator(dispatcher, store.clone(), CorrelationMode::SingleSlot);

        let first = initiator.initiate("a".to_string(), Vec::new()).await.unwrap();
        let second = initiator.initiate("b".to_string(), Vec::new()).await.unwrap();
        assert_eq!(first, CorrelationToken::single_slot());
        assert_eq!(first, second);

        store
            .put(&second, DiagnosisResult::from_json_text(r#"{"output":{"shindan":"ok"}}"#).unwrap())
            .unwrap();
        assert!(store.get(&first).unwrap().is_some());
    }
}
