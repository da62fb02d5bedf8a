//! Wire frames between the gateway and its downstream clients.
//!
//! All frames are internally tagged JSON (`{"type": "...", ...}`).
//! Unknown frame types at ingress are dropped by the receiver with a
//! debug log, never a panic.

use serde::{Deserialize, Serialize};

use crate::Task;

/// One observable LLM-engine occurrence, as normalized by the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TextDelta {
        text: String,
    },
    ToolStart {
        tool: String,
    },
    ToolUse {
        tool: String,
        /// JSON-encoded tool input
        input: String,
    },
    ToolResult {
        tool: String,
        output: String,
    },
    Done,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

/// Role a downstream client identifies as
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    Supervisor,
    Human,
    #[default]
    Unknown,
}

/// Actions the control plane can direct at the supervisor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorAction {
    Pause,
    Resume,
    Stop,
    Restart,
}

impl SupervisorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorAction::Pause => "pause",
            SupervisorAction::Resume => "resume",
            SupervisorAction::Stop => "stop",
            SupervisorAction::Restart => "restart",
        }
    }
}

/// Frames the gateway sends to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    TextDelta {
        text: String,
    },
    ToolStart {
        tool: String,
    },
    ToolUse {
        tool: String,
        input: String,
    },
    ToolResult {
        tool: String,
        output: String,
    },
    Done,
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// Replay of the event ring, sent first on connect
    History {
        events: Vec<Event>,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        agent_busy: bool,
        human_count: usize,
        supervisor_connected: bool,
        oc_connected: bool,
    },
    #[serde(rename_all = "camelCase")]
    ClientChange {
        humans: usize,
        supervisor_connected: bool,
    },
    TaskStatus {
        task: Task,
    },
    SupervisorControl {
        action: SupervisorAction,
    },
}

impl From<Event> for ServerFrame {
    fn from(event: Event) -> Self {
        match event {
            Event::TextDelta { text } => ServerFrame::TextDelta { text },
            Event::ToolStart { tool } => ServerFrame::ToolStart { tool },
            Event::ToolUse { tool, input } => ServerFrame::ToolUse { tool, input },
            Event::ToolResult { tool, output } => ServerFrame::ToolResult { tool, output },
            Event::Done => ServerFrame::Done,
            Event::Error { message, code } => ServerFrame::Error { message, code },
        }
    }
}

/// Frames clients send to the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Identify { role: ClientRole },
    UserMessage { content: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tags() {
        let json = serde_json::to_string(&Event::TextDelta {
            text: "hi".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"text_delta\""));

        let json = serde_json::to_string(&Event::Done).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);

        let json = serde_json::to_string(&Event::Error {
            message: "boom".to_string(),
            code: None,
        })
        .unwrap();
        assert!(!json.contains("code"));
    }

    #[test]
    fn status_frame_camel_case_fields() {
        let json = serde_json::to_string(&ServerFrame::Status {
            agent_busy: true,
            human_count: 2,
            supervisor_connected: true,
            oc_connected: false,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"agentBusy\":true"));
        assert!(json.contains("\"humanCount\":2"));
        assert!(json.contains("\"supervisorConnected\":true"));
        assert!(json.contains("\"ocConnected\":false"));
    }

    #[test]
    fn client_change_frame() {
        let json = serde_json::to_string(&ServerFrame::ClientChange {
            humans: 1,
            supervisor_connected: true,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"client_change\""));
        assert!(json.contains("\"humans\":1"));
        assert!(json.contains("\"supervisorConnected\":true"));
    }

    #[test]
    fn client_frame_roundtrip() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"identify","role":"supervisor"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Identify {
                role: ClientRole::Supervisor
            }
        );

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"user_message","content":"keep going"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::UserMessage { .. }));
    }

    #[test]
    fn unknown_frame_type_is_an_error_not_a_panic() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type":"telemetry","x":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn event_to_server_frame() {
        let frame: ServerFrame = Event::ToolUse {
            tool: "bash".to_string(),
            input: r#"{"cmd":"ls"}"#.to_string(),
        }
        .into();
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"tool_use\""));
    }

    #[test]
    fn supervisor_control_frame() {
        let json = serde_json::to_string(&ServerFrame::SupervisorControl {
            action: SupervisorAction::Pause,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"supervisor_control\""));
        assert!(json.contains("\"action\":\"pause\""));
    }
}
