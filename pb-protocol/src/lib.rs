//! Wire types shared between the bridge server and browser audio runtimes.
//!
//! Everything on the wire is JSON with a `type` tag. Commands flow server
//! to client and are fire-and-forget; commands that expect an answer carry
//! a `request_id` the client echoes in its reply message.

use serde::{Deserialize, Serialize};

/// Last known high-level state of a client runtime, reported via
/// `status_update`. The bridge never infers transitions on its own.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Executing,
    Stopped,
}

/// One named parameter and its value, as reported by the client.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParameterValue {
    pub name: String,
    pub value: f64,
}

/// Server to client commands.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    SessionCreated {
        session_id: String,
    },
    ExecuteCode {
        code: String,
    },
    ExecutePatch {
        code: String,
        from_line: u32,
        to_line: u32,
    },
    StopExecution,
    GetParameterValue {
        name: String,
        request_id: String,
    },
    SetParameterValue {
        name: String,
        value: f64,
        tween: f64,
        delay: f64,
        request_id: String,
    },
    PreloadSamples {
        samples: Vec<String>,
        request_id: String,
    },
    PlayFromLibrary {
        name: String,
        request_id: String,
    },
    SessionRenamedAck {
        name: String,
    },
}

impl BridgeCommand {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            BridgeCommand::GetParameterValue { request_id, .. }
            | BridgeCommand::SetParameterValue { request_id, .. }
            | BridgeCommand::PreloadSamples { request_id, .. }
            | BridgeCommand::PlayFromLibrary { request_id, .. } => Some(request_id),
            BridgeCommand::SessionCreated { .. }
            | BridgeCommand::ExecuteCode { .. }
            | BridgeCommand::ExecutePatch { .. }
            | BridgeCommand::StopExecution
            | BridgeCommand::SessionRenamedAck { .. } => None,
        }
    }
}

/// Client to server messages. The session is implied by the connection the
/// message arrives on; no message ever addresses another session.
///
/// `request_id` fields are optional so clients predating request
/// correlation still parse; their replies then only land in the session
/// store and the caller falls back to the timed read-back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StatusUpdate {
        status: SessionStatus,
    },
    ConsoleMessages {
        messages: Vec<String>,
    },
    PreloadComplete {
        result: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    PreloadError {
        error: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    ExecuteCodeError {
        error: String,
    },
    RenameSession {
        name: String,
    },
    PlayFromLibrarySuccess {
        name: String,
        #[serde(default)]
        request_id: Option<String>,
    },
    PlayFromLibraryError {
        name: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        request_id: Option<String>,
    },
    GetParameterValueFeedback {
        values: Vec<ParameterValue>,
        #[serde(default)]
        request_id: Option<String>,
    },
    SetParameterValueFeedback {
        values: Vec<ParameterValue>,
        #[serde(default)]
        request_id: Option<String>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_with_snake_case_type_tag() {
        let command = BridgeCommand::SetParameterValue {
            name: "gain".to_string(),
            value: 0.5,
            tween: 2.0,
            delay: 0.0,
            request_id: "req-7".to_string(),
        };
        let encoded = serde_json::to_value(&command).expect("command should encode");
        assert_eq!(encoded["type"], "set_parameter_value");
        assert_eq!(encoded["name"], "gain");
        assert_eq!(encoded["tween"], 2.0);
        assert_eq!(encoded["request_id"], "req-7");
    }

    #[test]
    fn stop_execution_has_no_payload() {
        let encoded =
            serde_json::to_value(&BridgeCommand::StopExecution).expect("command should encode");
        assert_eq!(encoded, serde_json::json!({"type": "stop_execution"}));
    }

    #[test]
    fn request_id_accessor_covers_replyable_commands() {
        let command = BridgeCommand::GetParameterValue {
            name: "gain".to_string(),
            request_id: "req-1".to_string(),
        };
        assert_eq!(command.request_id(), Some("req-1"));
        assert_eq!(
            BridgeCommand::ExecuteCode {
                code: String::new()
            }
            .request_id(),
            None
        );
    }

    #[test]
    fn feedback_parses_without_request_id() {
        let message: ClientMessage = serde_json::from_str(
            r#"{"type":"get_parameter_value_feedback","values":[{"name":"gain","value":0.7}]}"#,
        )
        .expect("feedback should parse");
        match message {
            ClientMessage::GetParameterValueFeedback { values, request_id } => {
                assert_eq!(values.len(), 1);
                assert_eq!(values[0].name, "gain");
                assert_eq!(values[0].value, 0.7);
                assert!(request_id.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn status_update_uses_snake_case_status() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"status_update","status":"executing"}"#)
                .expect("status update should parse");
        assert_eq!(
            message,
            ClientMessage::StatusUpdate {
                status: SessionStatus::Executing
            }
        );
    }

    #[test]
    fn unknown_message_type_fails_to_parse() {
        let parsed = serde_json::from_str::<ClientMessage>(r#"{"type":"bogus","x":1}"#);
        assert!(parsed.is_err());
    }
}
