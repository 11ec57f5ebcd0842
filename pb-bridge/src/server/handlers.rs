use super::*;

pub(super) async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();
    if path != "/ws" {
        info!(
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            elapsed_ms = elapsed_ms,
            "http access"
        );
    }
    response
}

pub(super) async fn healthz_handler() -> Json<StatusResponse> {
    Json(StatusResponse { status: "ok" })
}

pub(super) async fn metrics_handler(State(state): State<BridgeState>) -> impl IntoResponse {
    let connected_sessions = state.connected_sessions().await;
    let metrics = format!(
        concat!(
            "pb_bridge_uptime_seconds {}\n",
            "pb_bridge_connected_sessions {}\n",
            "pb_bridge_sessions_opened_total {}\n",
            "pb_bridge_sessions_closed_total {}\n",
            "pb_bridge_messages_received_total {}\n",
            "pb_bridge_malformed_messages_total {}\n",
            "pb_bridge_commands_sent_total {}\n",
            "pb_bridge_replies_matched_total {}\n",
            "pb_bridge_replies_timeout_total {}\n"
        ),
        state.metrics.started_at.elapsed().as_secs(),
        connected_sessions,
        state.metrics.sessions_opened_total.load(Ordering::Relaxed),
        state.metrics.sessions_closed_total.load(Ordering::Relaxed),
        state
            .metrics
            .messages_received_total
            .load(Ordering::Relaxed),
        state
            .metrics
            .malformed_messages_total
            .load(Ordering::Relaxed),
        state.metrics.commands_sent_total.load(Ordering::Relaxed),
        state.metrics.replies_matched_total.load(Ordering::Relaxed),
        state.metrics.replies_timeout_total.load(Ordering::Relaxed),
    );
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
}

pub(super) async fn list_sessions_handler(
    State(state): State<BridgeState>,
) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.list_sessions().await,
    })
}

pub(super) async fn get_session_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, (StatusCode, Json<ErrorResponse>)> {
    state
        .session_detail(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found("session not found"))
}

pub(super) async fn close_session_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .close_session(&session_id)
        .await
        .map_err(dispatch_error_response)?;
    Ok(Json(StatusResponse { status: "closing" }))
}

pub(super) async fn execute_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), (StatusCode, Json<ErrorResponse>)> {
    if request.code.trim().is_empty() {
        return Err(bad_request("code cannot be empty"));
    }
    state
        .execute_code(&session_id, request.code)
        .await
        .map_err(dispatch_error_response)?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { status: "dispatched" })))
}

pub(super) async fn execute_patch_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecutePatchRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), (StatusCode, Json<ErrorResponse>)> {
    if request.code.trim().is_empty() {
        return Err(bad_request("code cannot be empty"));
    }
    if request.to_line < request.from_line {
        return Err(bad_request("to_line cannot precede from_line"));
    }
    state
        .execute_patch(&session_id, request.code, request.from_line, request.to_line)
        .await
        .map_err(dispatch_error_response)?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { status: "dispatched" })))
}

pub(super) async fn stop_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<StatusResponse>), (StatusCode, Json<ErrorResponse>)> {
    state
        .stop_execution(&session_id)
        .await
        .map_err(dispatch_error_response)?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { status: "dispatched" })))
}

pub(super) async fn get_parameter_handler(
    State(state): State<BridgeState>,
    Path((session_id, name)): Path<(String, String)>,
) -> Result<Json<ParameterReadback>, (StatusCode, Json<ErrorResponse>)> {
    if name.trim().is_empty() {
        return Err(bad_request("parameter name cannot be empty"));
    }
    state
        .get_parameter(&session_id, &name)
        .await
        .map(Json)
        .map_err(dispatch_error_response)
}

pub(super) async fn put_parameter_handler(
    State(state): State<BridgeState>,
    Path((session_id, name)): Path<(String, String)>,
    Json(request): Json<SetParameterRequest>,
) -> Result<Json<ParameterReadback>, (StatusCode, Json<ErrorResponse>)> {
    if name.trim().is_empty() {
        return Err(bad_request("parameter name cannot be empty"));
    }
    if !request.value.is_finite() {
        return Err(bad_request("parameter value must be finite"));
    }
    if !request.tween.is_finite() || request.tween < 0.0 {
        return Err(bad_request("tween must be a non-negative number of seconds"));
    }
    if !request.delay.is_finite() || request.delay < 0.0 {
        return Err(bad_request("delay must be a non-negative number of seconds"));
    }
    state
        .set_parameter(&session_id, &name, request.value, request.tween, request.delay)
        .await
        .map(Json)
        .map_err(dispatch_error_response)
}

pub(super) async fn preload_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
    Json(request): Json<PreloadRequest>,
) -> Result<Json<CommandOutcome>, (StatusCode, Json<ErrorResponse>)> {
    if request.samples.is_empty() {
        return Err(bad_request("samples cannot be empty"));
    }
    state
        .preload_samples(&session_id, request.samples)
        .await
        .map(Json)
        .map_err(dispatch_error_response)
}

pub(super) async fn play_handler(
    State(state): State<BridgeState>,
    Path(session_id): Path<String>,
    Json(request): Json<PlayRequest>,
) -> Result<Json<CommandOutcome>, (StatusCode, Json<ErrorResponse>)> {
    if request.name.trim().is_empty() {
        return Err(bad_request("snippet name cannot be empty"));
    }
    state
        .play_from_library(&session_id, request.name)
        .await
        .map(Json)
        .map_err(dispatch_error_response)
}
