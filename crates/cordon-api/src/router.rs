//! Router construction and server host.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use cordon_policy::PolicyStore;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::exec::exec_aggregate;
use crate::health::health;
use crate::state::ApiState;
use crate::stream::exec_stream;

const HEADER_REQUEST_ID: &str = "x-request-id";

/// Axum router wrapper hosting the execution API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Wire the routes and the trace/request-id layer stack around the
    /// shared state.
    #[must_use]
    pub fn new(policy: Arc<PolicyStore>, default_cwd: PathBuf) -> Self {
        let state = ApiState {
            policy,
            default_cwd,
        };

        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty,
                )
            })
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );

        let layered = ServiceBuilder::new()
            .layer(cordon_telemetry::propagate_request_id_layer())
            .layer(cordon_telemetry::set_request_id_layer())
            .layer(trace_layer);

        let router = Router::new()
            .route("/health", get(health))
            .route("/v1/exec", post(exec_aggregate))
            .route("/v1/exec/stream", post(exec_stream))
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    /// Expose the inner router, used by in-process tests.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process exits.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot bind or the server loop
    /// fails.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "api server listening");
        axum::serve(listener, self.router.into_make_service()).await?;
        Ok(())
    }
}
