use super::*;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use futures_util::{SinkExt, StreamExt};

pub(super) async fn ws_handler(
    State(state): State<BridgeState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per browser connection. The write half is fed through an
/// unbounded channel so the dispatcher never awaits the socket; the read
/// half is drained here and routed message by message, which serializes
/// all handling for a single session.
async fn handle_socket(socket: WebSocket, state: BridgeState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let session_id = Uuid::new_v4().to_string();
    state.create_session(&session_id, tx.clone()).await;
    info!(session_id = %session_id, "session connected");

    let created = BridgeCommand::SessionCreated {
        session_id: session_id.clone(),
    };
    if send_command(&tx, &created).is_err() {
        state.remove_session(&session_id).await;
        forward_task.abort();
        return;
    }

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %session_id, "websocket read failed: {err}");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                state
                    .metrics
                    .messages_received_total
                    .fetch_add(1, Ordering::Relaxed);
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(message) => route_client_message(&state, &session_id, &tx, message).await,
                    Err(err) => {
                        state
                            .metrics
                            .malformed_messages_total
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(session_id = %session_id, "dropping malformed client message: {err}");
                    }
                }
            }
            Message::Close(_) => break,
            // Ping/pong are answered by axum; binary frames are not part
            // of the protocol.
            _ => {}
        }
    }

    state.remove_session(&session_id).await;
    forward_task.abort();
    info!(session_id = %session_id, "session disconnected");
}

pub(super) fn send_command(
    tx: &mpsc::UnboundedSender<Message>,
    command: &BridgeCommand,
) -> Result<(), ()> {
    let Ok(text) = serde_json::to_string(command) else {
        return Err(());
    };
    tx.send(Message::Text(text.into())).map_err(|_| ())
}

/// Routes one inbound message to its session's state. The match is
/// exhaustive, so adding a message kind is a compile-time checked change.
/// Every arm is idempotent under redelivery of the same event.
async fn route_client_message(
    state: &BridgeState,
    session_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::StatusUpdate { status } => {
            state
                .update_session(session_id, |record| record.status = status)
                .await;
        }
        ClientMessage::ConsoleMessages { messages } => {
            for line in &messages {
                info!(session_id = %session_id, "console: {line}");
            }
        }
        ClientMessage::PreloadComplete { result, request_id } => {
            state
                .update_session(session_id, |record| {
                    record.debug_info.last_preload_result = result.clone();
                })
                .await;
            state
                .resolve_waiter(
                    session_id,
                    request_id.as_deref(),
                    CommandReply::Completion {
                        ok: true,
                        detail: result,
                    },
                )
                .await;
        }
        ClientMessage::PreloadError { error, request_id } => {
            state
                .update_session(session_id, |record| {
                    record.debug_info.last_preload_result = error.clone();
                })
                .await;
            state
                .resolve_waiter(
                    session_id,
                    request_id.as_deref(),
                    CommandReply::Completion {
                        ok: false,
                        detail: error,
                    },
                )
                .await;
        }
        ClientMessage::ExecuteCodeError { error } => {
            state
                .update_session(session_id, |record| {
                    record.debug_info.last_execution_error = error;
                })
                .await;
        }
        ClientMessage::RenameSession { name } => {
            state
                .update_session(session_id, |record| record.name = Some(name.clone()))
                .await;
            let ack = BridgeCommand::SessionRenamedAck { name };
            if send_command(tx, &ack).is_err() {
                warn!(session_id = %session_id, "failed to ack session rename");
            }
        }
        ClientMessage::PlayFromLibrarySuccess { name, request_id } => {
            state
                .update_session(session_id, |record| {
                    record.debug_info.last_player_library_error = String::new();
                })
                .await;
            state
                .resolve_waiter(
                    session_id,
                    request_id.as_deref(),
                    CommandReply::Completion {
                        ok: true,
                        detail: name,
                    },
                )
                .await;
        }
        ClientMessage::PlayFromLibraryError {
            name,
            error,
            request_id,
        } => {
            let detail = error.unwrap_or_else(|| format!("failed to play {name}"));
            state
                .update_session(session_id, |record| {
                    record.debug_info.last_player_library_error = detail.clone();
                })
                .await;
            state
                .resolve_waiter(
                    session_id,
                    request_id.as_deref(),
                    CommandReply::Completion { ok: false, detail },
                )
                .await;
        }
        ClientMessage::GetParameterValueFeedback { values, request_id } => {
            state.write_parameters(session_id, &values).await;
            state
                .resolve_waiter(
                    session_id,
                    request_id.as_deref(),
                    CommandReply::Parameters(values),
                )
                .await;
        }
        ClientMessage::SetParameterValueFeedback { values, request_id } => {
            state.write_parameters(session_id, &values).await;
            state
                .resolve_waiter(
                    session_id,
                    request_id.as_deref(),
                    CommandReply::Parameters(values),
                )
                .await;
        }
        ClientMessage::Error { message } => {
            warn!(session_id = %session_id, "client reported error: {message}");
        }
    }
}
