//! Health endpoint.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) policy: &'static str,
}

/// Liveness plus the current policy posture. A deny-all store still reports
/// "ok": the server is up, it just refuses every invocation.
pub(crate) async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let policy = if state.policy.is_deny_all() {
        "deny_all"
    } else {
        "valid"
    };
    Json(HealthResponse {
        status: "ok",
        policy,
    })
}
