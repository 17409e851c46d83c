use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — counters for dispatched jobs, callbacks, served results and
/// evictions, in Prometheus text format.
pub async fn render_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
