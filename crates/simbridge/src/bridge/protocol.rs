//! Wire protocol types for bridge-worker communication.
//!
//! Commands flow from the bridge to the worker, replies flow back. The
//! transport gives no request/response framing, so every command carries a
//! correlation id that the worker echoes as `requestId` in its reply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire name of the correlation id field.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Unique identifier for one in-flight command.
///
/// UUID v4 rather than a timestamp: two commands issued within the same
/// clock tick must never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Commands the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartSimulation,
    StopSimulation,
    PauseSimulation,
    SendGooseMessage,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSimulation => "start_simulation",
            Self::StopSimulation => "stop_simulation",
            Self::PauseSimulation => "pause_simulation",
            Self::SendGooseMessage => "send_goose_message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start_simulation" => Some(Self::StartSimulation),
            "stop_simulation" => Some(Self::StopSimulation),
            "pause_simulation" => Some(Self::PauseSimulation),
            "send_goose_message" => Some(Self::SendGooseMessage),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the payload and correlation id sit inside a command object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireLayout {
    /// `{"type", "data": {"config", "requestId"}}` - what the simulator parses.
    #[default]
    Nested,
    /// `{"type", "data", "requestId"}`
    Flat,
}

impl WireLayout {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nested" => Some(Self::Nested),
            "flat" => Some(Self::Flat),
            _ => None,
        }
    }
}

/// An outgoing command. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    kind: CommandKind,
    correlation_id: CorrelationId,
    payload: Value,
}

impl CommandEnvelope {
    pub fn new(kind: CommandKind, correlation_id: CorrelationId, payload: Value) -> Self {
        Self {
            kind,
            correlation_id,
            payload,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Structural mapping to the JSON object written on the socket.
    pub fn to_wire(&self, layout: WireLayout) -> Value {
        let id = Value::String(self.correlation_id.to_string());
        let mut object = Map::new();
        object.insert("type".to_string(), Value::String(self.kind.to_string()));
        match layout {
            WireLayout::Nested => {
                let mut data = Map::new();
                if !self.payload.is_null() {
                    data.insert("config".to_string(), self.payload.clone());
                }
                data.insert(REQUEST_ID_FIELD.to_string(), id);
                object.insert("data".to_string(), Value::Object(data));
            }
            WireLayout::Flat => {
                object.insert("data".to_string(), self.payload.clone());
                object.insert(REQUEST_ID_FIELD.to_string(), id);
            }
        }
        Value::Object(object)
    }
}

/// A reply from the worker with the correlation id split off.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub correlation_id: CorrelationId,
    /// Every other field of the reply object, forwarded verbatim.
    pub payload: Map<String, Value>,
}

impl ReplyEnvelope {
    pub fn new(correlation_id: CorrelationId, payload: Map<String, Value>) -> Self {
        Self {
            correlation_id,
            payload,
        }
    }

    pub fn to_wire(&self) -> Value {
        let mut object = self.payload.clone();
        object.insert(
            REQUEST_ID_FIELD.to_string(),
            Value::String(self.correlation_id.to_string()),
        );
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_id() -> CorrelationId {
        CorrelationId::from("550e8400-e29b-41d4-a716-446655440000")
    }

    #[test]
    fn generated_ids_are_distinct() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn command_kind_names_match_serde() {
        for kind in [
            CommandKind::StartSimulation,
            CommandKind::StopSimulation,
            CommandKind::PauseSimulation,
            CommandKind::SendGooseMessage,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
            assert_eq!(CommandKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CommandKind::parse("reboot"), None);
    }

    #[test]
    fn wire_layout_parses_case_insensitively() {
        assert_eq!(WireLayout::parse("FLAT"), Some(WireLayout::Flat));
        assert_eq!(WireLayout::parse("nested"), Some(WireLayout::Nested));
        assert_eq!(WireLayout::parse("tree"), None);
    }

    #[test]
    fn nested_start_command_serializes() {
        let cmd = CommandEnvelope::new(
            CommandKind::StartSimulation,
            test_id(),
            json!({"iface": "eth0"}),
        );
        insta::assert_json_snapshot!(cmd.to_wire(WireLayout::Nested), @r#"
        {
          "data": {
            "config": {
              "iface": "eth0"
            },
            "requestId": "550e8400-e29b-41d4-a716-446655440000"
          },
          "type": "start_simulation"
        }
        "#);
    }

    #[test]
    fn nested_stop_command_omits_config() {
        let cmd = CommandEnvelope::new(CommandKind::StopSimulation, test_id(), Value::Null);
        insta::assert_json_snapshot!(cmd.to_wire(WireLayout::Nested), @r#"
        {
          "data": {
            "requestId": "550e8400-e29b-41d4-a716-446655440000"
          },
          "type": "stop_simulation"
        }
        "#);
    }

    #[test]
    fn flat_command_serializes() {
        let cmd = CommandEnvelope::new(
            CommandKind::SendGooseMessage,
            test_id(),
            json!({"goID": "0x1000"}),
        );
        insta::assert_json_snapshot!(cmd.to_wire(WireLayout::Flat), @r#"
        {
          "data": {
            "goID": "0x1000"
          },
          "requestId": "550e8400-e29b-41d4-a716-446655440000",
          "type": "send_goose_message"
        }
        "#);
    }

    #[test]
    fn reply_wire_carries_request_id() {
        let mut payload = Map::new();
        payload.insert("message".to_string(), json!("ok"));
        let reply = ReplyEnvelope::new(test_id(), payload);
        assert_eq!(
            reply.to_wire(),
            json!({"message": "ok", "requestId": "550e8400-e29b-41d4-a716-446655440000"})
        );
    }
}
