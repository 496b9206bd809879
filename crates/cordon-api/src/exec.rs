//! Aggregate execution endpoint: full capture with per-stream caps.

use std::path::PathBuf;
use std::time::Instant;

use axum::Json;
use axum::extract::{State, rejection::JsonRejection};
use axum::response::{IntoResponse, Response};
use cordon_api_models::{ExecRequest, ExecResponse};
use cordon_exec::{authorize, run_aggregate};

use crate::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn exec_aggregate(
    State(state): State<ApiState>,
    payload: Result<Json<ExecRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(error) => {
            tracing::warn!(error = %error, "exec request rejected before validation");
            return ApiError::bad_request(format!("invalid request payload: {error}"))
                .into_response();
        }
    };

    let started = Instant::now();
    let snapshot = state.policy.snapshot();
    let invocation = match authorize(
        &snapshot,
        &request.executable,
        request.args,
        request.env.unwrap_or_default(),
        request.cwd.map(PathBuf::from),
    ) {
        Ok(invocation) => invocation,
        Err(error) => {
            tracing::warn!(command = %request.executable, error = %error, "exec request denied");
            return ApiError::from(error).into_response();
        }
    };

    tracing::info!(command = %invocation.command, args = ?invocation.args, "exec request accepted");

    match run_aggregate(&invocation, &state.default_cwd).await {
        Ok(result) => {
            tracing::info!(
                command = %invocation.command,
                exit_code = ?result.exit_code,
                duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "exec request completed",
            );
            Json(ExecResponse {
                stdout: result.stdout,
                stderr: result.stderr,
                exit_code: result.exit_code,
            })
            .into_response()
        }
        Err(error) => {
            tracing::error!(command = %invocation.command, error = %error, "exec request failed");
            ApiError::from(error).into_response()
        }
    }
}
