//! NDJSON streaming endpoint.
//!
//! Authorization and spawn happen before any stream output, so those
//! failures are plain JSON error responses. Once the `start` event is sent,
//! the stream always ends with exactly one `exit` or `error` event, and a
//! consumer that disappears gets the child terminated.

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Instant;

use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{State, rejection::JsonRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use cordon_api_models::{ExecRequest, NDJSON_CONTENT_TYPE, StreamEvent};
use cordon_exec::{
    Invocation, OutputStreamKind, ReaderEvent, authorize, spawn_invocation, spawn_stream_readers,
    terminate_child,
};
use futures_util::StreamExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::ApiError;
use crate::state::ApiState;

const BODY_CHANNEL_CAPACITY: usize = 64;

pub(crate) async fn exec_stream(
    State(state): State<ApiState>,
    payload: Result<Json<ExecRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(error) => {
            tracing::warn!(error = %error, "stream request rejected before validation");
            return ApiError::bad_request(format!("invalid request payload: {error}"))
                .into_response();
        }
    };

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
            tracing::warn!(command = %request.executable, error = %error, "stream request denied");
            return ApiError::from(error).into_response();
        }
    };

    let mut child = match spawn_invocation(&invocation, &state.default_cwd) {
        Ok(child) => child,
        Err(error) => {
            tracing::error!(command = %invocation.command, error = %error, "stream request failed before start");
            return ApiError::from(error).into_response();
        }
    };

    let reader_rx = match spawn_stream_readers(&mut child) {
        Ok(rx) => rx,
        Err(error) => {
            terminate_child(&mut child).await;
            tracing::error!(command = %invocation.command, error = %error, "stream request failed before start");
            return ApiError::from(error).into_response();
        }
    };

    tracing::info!(command = %invocation.command, args = ?invocation.args, "stream request accepted");

    let (tx, rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
    tokio::spawn(drive_stream(child, reader_rx, tx, invocation));

    let body_stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    response
}

async fn drive_stream(
    mut child: Child,
    mut reader_rx: mpsc::Receiver<ReaderEvent>,
    tx: mpsc::Sender<Bytes>,
    invocation: Invocation,
) {
    let started = Instant::now();
    if !send_event(&tx, &StreamEvent::Start {}).await {
        tracing::info!(command = %invocation.command, "stream consumer gone before start event");
        terminate_child(&mut child).await;
        return;
    }

    let mut readers_done = false;
    let mut exit_code: Option<Option<i32>> = None;

    loop {
        tokio::select! {
            // A silent child produces no send to fail on, so watch the
            // channel itself and tear down as soon as the consumer is gone.
            () = tx.closed() => {
                tracing::info!(command = %invocation.command, "stream consumer gone; terminating child");
                terminate_child(&mut child).await;
                return;
            }
            status = child.wait(), if exit_code.is_none() => {
                match status {
                    Ok(status) => {
                        exit_code = Some(status.code());
                    }
                    Err(error) => {
                        tracing::error!(command = %invocation.command, error = %error, "stream wait failure");
                        let _ = send_event(&tx, &StreamEvent::Error {
                            message: format!("failed to wait for subprocess: {error}"),
                        }).await;
                        return;
                    }
                }
            }
            maybe_event = reader_rx.recv(), if !readers_done => {
                match maybe_event {
                    Some(ReaderEvent::Chunk { stream, data }) => {
                        let event = match stream {
                            OutputStreamKind::Stdout => StreamEvent::stdout_chunk(&data),
                            OutputStreamKind::Stderr => StreamEvent::stderr_chunk(&data),
                        };
                        if !send_event(&tx, &event).await {
                            tracing::info!(command = %invocation.command, "stream consumer gone mid-stream");
                            terminate_child(&mut child).await;
                            return;
                        }
                    }
                    Some(ReaderEvent::Done { .. }) => {}
                    Some(ReaderEvent::ReadError { stream, message }) => {
                        tracing::error!(
                            command = %invocation.command,
                            stream = stream.as_str(),
                            error = %message,
                            "stream read failure",
                        );
                        let _ = send_event(&tx, &StreamEvent::Error {
                            message: format!("failed reading {}: {message}", stream.as_str()),
                        }).await;
                        terminate_child(&mut child).await;
                        return;
                    }
                    None => readers_done = true,
                }
            }
        }

        if exit_code.is_some() && readers_done {
            break;
        }
    }

    let final_exit_code = exit_code.flatten();
    if !send_event(
        &tx,
        &StreamEvent::Exit {
            exit_code: final_exit_code,
        },
    )
    .await
    {
        tracing::info!(command = %invocation.command, "stream consumer gone before exit event");
        terminate_child(&mut child).await;
        return;
    }

    tracing::info!(
        command = %invocation.command,
        exit_code = ?final_exit_code,
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "stream request completed",
    );
}

async fn send_event(tx: &mpsc::Sender<Bytes>, event: &StreamEvent) -> bool {
    let mut line = match serde_json::to_vec(event) {
        Ok(line) => line,
        Err(error) => {
            tracing::error!(error = %error, "failed serializing stream event");
            return false;
        }
    };
    line.push(b'\n');
    tx.send(Bytes::from(line)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;

    use axum::body::Bytes;
    use axum::http::{StatusCode, header};
    use cordon_api_models::{ErrorBody, ExecRequest, NDJSON_CONTENT_TYPE, StreamEvent,
        decode_payload};
    use cordon_exec::{Invocation, MAX_OUTPUT_BYTES, spawn_invocation, spawn_stream_readers};
    use cordon_test_support::find_executable;
    use tokio::sync::mpsc;

    use super::drive_stream;
    use crate::router::testing::{allow_store, start_server};

    fn request_for(executable: &str, args: &[&str]) -> ExecRequest {
        ExecRequest {
            executable: executable.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            cwd: None,
            env: None,
        }
    }

    async fn decode_events(response: reqwest::Response) -> Vec<StreamEvent> {
        let payload = response.text().await.expect("stream body");
        payload
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<StreamEvent>(line).expect("valid event"))
            .collect()
    }

    fn collect_stdout(events: &[StreamEvent]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for event in events {
            if let StreamEvent::Stdout { data_b64 } = event {
                bytes.extend_from_slice(&decode_payload(data_b64).expect("decode stdout"));
            }
        }
        bytes
    }

    fn collect_stderr(events: &[StreamEvent]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for event in events {
            if let StreamEvent::Stderr { data_b64 } = event {
                bytes.extend_from_slice(&decode_payload(data_b64).expect("decode stderr"));
            }
        }
        bytes
    }

    #[tokio::test]
    async fn streams_start_output_and_exit_in_order() {
        let Some(sh_path) = find_executable("sh") else {
            return;
        };
        let sh_path = sh_path.to_string_lossy().into_owned();
        let (base_url, server) = start_server(allow_store(&[&sh_path])).await;

        let response = reqwest::Client::new()
            .post(format!("{base_url}/v1/exec/stream"))
            .json(&request_for(
                &sh_path,
                &["-c", "printf 'hello'; printf 'oops' >&2"],
            ))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .expect("content type"),
            NDJSON_CONTENT_TYPE
        );

        let events = decode_events(response).await;
        assert!(matches!(events.first(), Some(StreamEvent::Start {})));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Exit { exit_code: Some(0) })
        ));
        assert_eq!(
            events.iter().filter(|event| event.is_terminal()).count(),
            1
        );
        assert_eq!(collect_stdout(&events), b"hello");
        assert_eq!(collect_stderr(&events), b"oops");

        server.abort();
    }

    #[tokio::test]
    async fn denied_stream_is_a_plain_json_error() {
        let Some(true_path) = find_executable("true") else {
            return;
        };
        let true_path = true_path.to_string_lossy().into_owned();
        let (base_url, server) = start_server(allow_store(&[&true_path])).await;

        let response = reqwest::Client::new()
            .post(format!("{base_url}/v1/exec/stream"))
            .json(&request_for("echo", &["blocked"]))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = response.json::<ErrorBody>().await.expect("error body");
        assert!(body.error.contains("not allowed"));

        server.abort();
    }

    #[tokio::test]
    async fn streaming_mode_never_truncates() {
        let Some(head_path) = find_executable("head") else {
            return;
        };
        let head_path = head_path.to_string_lossy().into_owned();
        let requested = MAX_OUTPUT_BYTES + 4096;
        let (base_url, server) = start_server(allow_store(&[&head_path])).await;

        let response = reqwest::Client::new()
            .post(format!("{base_url}/v1/exec/stream"))
            .json(&request_for(
                &head_path,
                &["-c", &requested.to_string(), "/dev/zero"],
            ))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let events = decode_events(response).await;
        assert_eq!(collect_stdout(&events).len(), requested);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Exit { exit_code: Some(0) })
        ));

        server.abort();
    }

    #[tokio::test]
    async fn payload_bytes_survive_the_wire_exactly() {
        let Some(sh_path) = find_executable("sh") else {
            return;
        };
        let sh_path = sh_path.to_string_lossy().into_owned();
        let (base_url, server) = start_server(allow_store(&[&sh_path])).await;

        let response = reqwest::Client::new()
            .post(format!("{base_url}/v1/exec/stream"))
            .json(&request_for(&sh_path, &["-c", "printf '\\377\\000A'"]))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let events = decode_events(response).await;
        assert_eq!(collect_stdout(&events), vec![255, 0, 65]);

        server.abort();
    }

    #[tokio::test]
    async fn silent_child_is_terminated_when_consumer_disconnects() {
        let Some(sh_path) = find_executable("sh") else {
            return;
        };
        let invocation = Invocation {
            command: sh_path.to_string_lossy().into_owned(),
            path: sh_path.to_string_lossy().into_owned(),
            hash: "0000000000000000000000000000000000000000000000000000000000000000"
                .to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            env: BTreeMap::new(),
            cwd: None,
        };

        let mut child = spawn_invocation(&invocation, Path::new(".")).expect("spawn");
        let reader_rx = spawn_stream_readers(&mut child).expect("readers");
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);
        let driver = tokio::spawn(drive_stream(child, reader_rx, tx, invocation));

        let first = rx.recv().await.expect("start line");
        assert!(first.starts_with(b"{\"event\":\"start\""));
        drop(rx);

        // The child writes nothing, so only the disconnect itself can end
        // the drive; well under the 30 s the child would otherwise run.
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("drive must end promptly after disconnect")
            .expect("drive task");
    }

    #[tokio::test]
    async fn per_stream_order_is_preserved() {
        let Some(sh_path) = find_executable("sh") else {
            return;
        };
        let sh_path = sh_path.to_string_lossy().into_owned();
        let script = "(for i in 1 2 3; do printf \"o$i\"; done) & \
                      (for i in 1 2 3; do printf \"e$i\" >&2; done) & wait";
        let (base_url, server) = start_server(allow_store(&[&sh_path])).await;

        let response = reqwest::Client::new()
            .post(format!("{base_url}/v1/exec/stream"))
            .json(&request_for(&sh_path, &["-c", script]))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);

        let events = decode_events(response).await;
        assert_eq!(collect_stdout(&events), b"o1o2o3");
        assert_eq!(collect_stderr(&events), b"e1e2e3");

        server.abort();
    }
}
