use std::sync::Arc;
use std::time::Duration;

use crate::services::{initiator::JobInitiator, result_store::ResultStore, storage::ImageStorage};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResultStore>,
    pub initiator: Arc<JobInitiator>,
    pub slot_initiator: Arc<JobInitiator>,
    pub storage: Option<Arc<dyn ImageStorage>>,
    pub webhook_secret: Option<Arc<str>>,
    pub long_poll_max: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ResultStore>,
        initiator: JobInitiator,
        slot_initiator: JobInitiator,
        storage: Option<Arc<dyn ImageStorage>>,
        webhook_secret: Option<String>,
        long_poll_max: Duration,
    ) -> Self {
        Self {
            store,
            initiator: Arc::new(initiator),
            slot_initiator: Arc::new(slot_initiator),
            storage,
            webhook_secret: webhook_secret.map(Arc::from),
            long_poll_max,
        }
    }
}
