//! The narrow slice of the LLM-engine wire protocol the gateway consumes.
//!
//! The engine speaks JSON over a local WebSocket. On socket establishment
//! it sends `connect.challenge`; the gateway answers with a `connect`
//! request carrying client identity, a protocol version range, the
//! operator role, and auth material (password preferred, token accepted).
//! After `connect.ok`, chat traffic flows on a fixed session key.

use serde::{Deserialize, Serialize};

use drover_spec::Event;

/// Protocol versions this gateway can speak
pub const PROTOCOL_MIN: u32 = 1;
pub const PROTOCOL_MAX: u32 = 3;

/// Frames received from the engine
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EngineServerFrame {
    #[serde(rename = "connect.challenge")]
    ConnectChallenge {
        #[serde(default)]
        challenge: Option<String>,
    },

    #[serde(rename = "connect.ok")]
    ConnectOk {
        #[serde(default)]
        protocol: Option<u32>,
    },

    #[serde(rename = "chat.ack")]
    ChatAck { nonce: String },

    #[serde(rename = "chat.event")]
    ChatEvent {
        session: String,
        event: EngineChatEvent,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

/// One engine chat occurrence before normalization
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineChatEvent {
    Delta {
        text: String,
    },
    Tool {
        phase: ToolPhase,
        tool: String,
        #[serde(default)]
        input: Option<serde_json::Value>,
        #[serde(default)]
        output: Option<String>,
    },
    Final,
    Aborted,
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Start,
    Result,
}

/// Frames sent to the engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineClientFrame {
    #[serde(rename = "connect")]
    Connect {
        client: ClientIdent,
        role: &'static str,
        protocol: ProtocolRange,
        auth: AuthMaterial,
    },

    #[serde(rename = "chat.send")]
    ChatSend {
        session: String,
        message: String,
        /// Idempotency nonce, fresh per send
        nonce: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientIdent {
    pub name: String,
    pub version: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProtocolRange {
    pub min: u32,
    pub max: u32,
}

/// Password is preferred; a token is accepted when no password is set.
#[derive(Debug, Clone, Serialize)]
pub struct AuthMaterial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Whether a chat event terminates the in-flight turn
pub fn is_terminal(event: &EngineChatEvent) -> bool {
    matches!(
        event,
        EngineChatEvent::Final | EngineChatEvent::Aborted | EngineChatEvent::Error { .. }
    )
}

/// Normalize one engine chat event into downstream events.
///
/// Tool events with phase `start` yield `tool_start` followed by
/// `tool_use` (input JSON-encoded); phase `result` yields `tool_result`.
/// `aborted` yields `done` so clients always observe a turn terminator.
pub fn normalize(event: EngineChatEvent) -> Vec<Event> {
    match event {
        EngineChatEvent::Delta { text } => vec![Event::TextDelta { text }],
        EngineChatEvent::Tool {
            phase: ToolPhase::Start,
            tool,
            input,
            ..
        } => {
            let input = input
                .map(|v| v.to_string())
                .unwrap_or_else(|| "{}".to_string());
            vec![
                Event::ToolStart { tool: tool.clone() },
                Event::ToolUse { tool, input },
            ]
        }
        EngineChatEvent::Tool {
            phase: ToolPhase::Result,
            tool,
            output,
            ..
        } => vec![Event::ToolResult {
            tool,
            output: output.unwrap_or_default(),
        }],
        EngineChatEvent::Final | EngineChatEvent::Aborted => vec![Event::Done],
        EngineChatEvent::Error { message, code } => vec![Event::Error { message, code }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_decodes() {
        let frame: EngineServerFrame =
            serde_json::from_str(r#"{"type":"connect.challenge","challenge":"abc"}"#).unwrap();
        assert!(matches!(
            frame,
            EngineServerFrame::ConnectChallenge { challenge: Some(_) }
        ));
    }

    #[test]
    fn connect_serializes_with_role_and_range() {
        let frame = EngineClientFrame::Connect {
            client: ClientIdent {
                name: "drover-gateway".to_string(),
                version: "0.4.0",
            },
            role: "operator",
            protocol: ProtocolRange {
                min: PROTOCOL_MIN,
                max: PROTOCOL_MAX,
            },
            auth: AuthMaterial {
                password: Some("pw".to_string()),
                token: None,
            },
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"connect\""));
        assert!(json.contains("\"role\":\"operator\""));
        assert!(json.contains("\"min\":1"));
        assert!(!json.contains("token"));
    }

    #[test]
    fn chat_event_decodes() {
        let frame: EngineServerFrame = serde_json::from_str(
            r#"{"type":"chat.event","session":"main:webchat:drover-demo",
                "event":{"kind":"tool","phase":"start","tool":"bash","input":{"cmd":"ls"}}}"#,
        )
        .unwrap();
        match frame {
            EngineServerFrame::ChatEvent { session, event } => {
                assert_eq!(session, "main:webchat:drover-demo");
                assert!(!is_terminal(&event));
                let events = normalize(event);
                assert_eq!(events.len(), 2);
                assert!(matches!(events[0], Event::ToolStart { .. }));
                match &events[1] {
                    Event::ToolUse { tool, input } => {
                        assert_eq!(tool, "bash");
                        assert!(input.contains("\"cmd\""));
                    }
                    other => panic!("expected tool_use, got {other:?}"),
                }
            }
            other => panic!("expected chat.event, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_normalizes() {
        let events = normalize(EngineChatEvent::Tool {
            phase: ToolPhase::Result,
            tool: "bash".to_string(),
            input: None,
            output: Some("file1\nfile2\n".to_string()),
        });
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ToolResult { .. }));
    }

    #[test]
    fn final_and_aborted_both_terminate() {
        assert!(is_terminal(&EngineChatEvent::Final));
        assert!(is_terminal(&EngineChatEvent::Aborted));
        assert_eq!(normalize(EngineChatEvent::Final), vec![Event::Done]);
        assert_eq!(normalize(EngineChatEvent::Aborted), vec![Event::Done]);
    }

    #[test]
    fn unknown_engine_frame_is_an_error() {
        assert!(serde_json::from_str::<EngineServerFrame>(r#"{"type":"metrics.push"}"#).is_err());
    }
}
