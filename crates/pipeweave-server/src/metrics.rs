//! Prometheus metrics exposition. Installs the global recorder once at
//! startup and serves its rendered text format over `/metrics`.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub fn install() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub(crate) fn routes(handle: PrometheusHandle) -> axum::Router<crate::state::AppState> {
    axum::Router::new().route("/metrics", axum::routing::get(move || render(handle.clone())))
}

async fn render(handle: PrometheusHandle) -> String {
    handle.render()
}
