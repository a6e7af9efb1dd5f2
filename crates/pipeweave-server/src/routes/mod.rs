//! Route assembly (§6): every module contributes a `Router<AppState>`
//! fragment that gets merged into one app here, with the ambient
//! tracing/CORS/body-limit layers applied on top.

mod callback;
mod dlq;
mod health;
mod heartbeat;
mod maintenance;
mod pipeline_runs;
mod pipelines;
mod queue;
mod register;
mod tick;

use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build(state: AppState, max_body_bytes: usize, metrics_handle: PrometheusHandle) -> axum::Router {
    axum::Router::new()
        .merge(health::routes())
        .merge(register::routes())
        .merge(pipelines::routes())
        .merge(pipeline_runs::routes())
        .merge(callback::routes())
        .merge(heartbeat::routes())
        .merge(tick::routes())
        .merge(queue::routes())
        .merge(dlq::routes())
        .merge(maintenance::routes())
        .merge(crate::metrics::routes(metrics_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}
