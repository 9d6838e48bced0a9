//! The on-wire `ProtocolMessage` record and its typed builder.
//!
//! Wire framing itself lives in [`super::framing`]; this module only
//! defines the JSON-encoded payload and the per-message-type
//! constructors that assemble it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Wire string for every message_type, including the heartbeat tag which
/// is upper-cased unlike its siblings (kept verbatim from the original
/// protocol so older captures/docs referencing "HEARTBEAT" stay valid).
pub mod message_type {
    pub const MOUSE: &str = "mouse";
    pub const KEYBOARD: &str = "keyboard";
    pub const CLIPBOARD: &str = "clipboard";
    pub const FILE: &str = "file";
    pub const COMMAND: &str = "command";
    pub const SCREEN: &str = "screen";
    pub const EXCHANGE: &str = "exchange";
    pub const HEARTBEAT: &str = "HEARTBEAT";
}

/// Screen-position identifiers used in `source`/`target` and in the peer
/// registry. Kept as plain strings on the wire (matching the Python
/// original) but exposed as an enum internally for exhaustive matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenPosition {
    Server,
    Left,
    Right,
    Top,
    Bottom,
    Center,
}

impl ScreenPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenPosition::Server => "server",
            ScreenPosition::Left => "left",
            ScreenPosition::Right => "right",
            ScreenPosition::Top => "top",
            ScreenPosition::Bottom => "bottom",
            ScreenPosition::Center => "center",
        }
    }

    /// The neighbor opposite this one across the shared edge, used when
    /// computing first-crossing normalization and return-crossing checks.
    pub fn opposite(&self) -> Option<ScreenPosition> {
        match self {
            ScreenPosition::Left => Some(ScreenPosition::Right),
            ScreenPosition::Right => Some(ScreenPosition::Left),
            ScreenPosition::Top => Some(ScreenPosition::Bottom),
            ScreenPosition::Bottom => Some(ScreenPosition::Top),
            _ => None,
        }
    }
}

impl std::str::FromStr for ScreenPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(ScreenPosition::Server),
            "left" => Ok(ScreenPosition::Left),
            "right" => Ok(ScreenPosition::Right),
            "top" => Ok(ScreenPosition::Top),
            "bottom" => Ok(ScreenPosition::Bottom),
            "center" => Ok(ScreenPosition::Center),
            other => Err(format!("unknown screen_position {other:?}")),
        }
    }
}

/// The payload map is free-form JSON keyed by message_type (see
/// spec.md §4.A for the shape expected per type). Reserved keys are
/// read by typed accessors below; anything else is forwarded verbatim.
pub type Payload = Map<String, Value>;

/// The on-wire record. `timestamp` and `sequence_id` are assigned once
/// at construction by [`MessageBuilder`] and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub message_type: String,
    pub timestamp: f64,
    pub sequence_id: u64,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default)]
    pub is_chunk: bool,
}

impl ProtocolMessage {
    pub fn is_heartbeat(&self) -> bool {
        self.message_type == message_type::HEARTBEAT
    }

    /// Size of this message once framed (used to decide whether chunking
    /// is needed, and to bound emitted chunk sizes — spec.md §4.A/§8.2).
    pub fn serialized_size(&self) -> usize {
        super::framing::encode_frame(self).len()
    }
}

/// Per-sender monotonic sequence counter plus typed constructors for
/// every message_type. One builder per sending process/substream, as
/// spec.md §3 requires sequence_id to be monotonic per sender.
pub struct MessageBuilder {
    sequence_counter: u64,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self { sequence_counter: 0 }
    }

    fn next_sequence_id(&mut self) -> u64 {
        self.sequence_counter += 1;
        self.sequence_counter
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    fn base(&mut self, message_type: &str, payload: Payload, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        ProtocolMessage {
            message_type: message_type.to_string(),
            timestamp: Self::now(),
            sequence_id: self.next_sequence_id(),
            payload,
            source,
            target,
            message_id: None,
            chunk_index: None,
            total_chunks: None,
            is_chunk: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mouse(
        &mut self,
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
        event: &str,
        is_pressed: bool,
        source: Option<String>,
        target: Option<String>,
        extra: Option<Payload>,
    ) -> ProtocolMessage {
        let mut payload = extra.unwrap_or_default();
        payload.insert("x".into(), Value::from(x));
        payload.insert("y".into(), Value::from(y));
        payload.insert("dx".into(), Value::from(dx));
        payload.insert("dy".into(), Value::from(dy));
        payload.insert("event".into(), Value::from(event));
        payload.insert("is_pressed".into(), Value::from(is_pressed));
        self.base(message_type::MOUSE, payload, source, target)
    }

    pub fn keyboard(&mut self, key: &str, event: &str, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        let mut payload = Payload::new();
        payload.insert("key".into(), Value::from(key));
        payload.insert("event".into(), Value::from(event));
        self.base(message_type::KEYBOARD, payload, source, target)
    }

    pub fn clipboard(&mut self, content: &str, content_type: &str, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        let mut payload = Payload::new();
        payload.insert("content".into(), Value::from(content));
        payload.insert("content_type".into(), Value::from(content_type));
        self.base(message_type::CLIPBOARD, payload, source, target)
    }

    pub fn command(&mut self, command: &str, params: Payload, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        let mut payload = Payload::new();
        payload.insert("command".into(), Value::from(command));
        payload.insert("params".into(), Value::Object(params));
        self.base(message_type::COMMAND, payload, source, target)
    }

    pub fn screen(&mut self, command: &str, data: Payload, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        let mut payload = Payload::new();
        payload.insert("command".into(), Value::from(command));
        payload.insert("data".into(), Value::Object(data));
        self.base(message_type::SCREEN, payload, source, target)
    }

    pub fn file(&mut self, command: &str, mut data: Payload, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        data.insert("command".into(), Value::from(command));
        self.base(message_type::FILE, data, source, target)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn exchange(
        &mut self,
        client_name: Option<&str>,
        screen_resolution: Option<&str>,
        screen_position: Option<&str>,
        additional_params: Payload,
        ack: bool,
        ssl: bool,
        streams: Vec<i64>,
        source: Option<String>,
        target: Option<String>,
    ) -> ProtocolMessage {
        let mut payload = Payload::new();
        payload.insert("client_name".into(), client_name.map(Value::from).unwrap_or(Value::Null));
        payload.insert("screen_resolution".into(), screen_resolution.map(Value::from).unwrap_or(Value::Null));
        payload.insert("screen_position".into(), screen_position.map(Value::from).unwrap_or(Value::Null));
        payload.insert("ack".into(), Value::from(ack));
        payload.insert("ssl".into(), Value::from(ssl));
        payload.insert("streams".into(), Value::from(streams));
        payload.insert("additional_params".into(), Value::Object(additional_params));
        self.base(message_type::EXCHANGE, payload, source, target)
    }

    pub fn heartbeat(&mut self, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        self.base(message_type::HEARTBEAT, Payload::new(), source, target)
    }

    /// Escape hatch for arbitrary message_type/payload combinations, kept
    /// for diagnostics parity with the original `send_custom_message`.
    pub fn custom(&mut self, message_type: &str, payload: Payload, source: Option<String>, target: Option<String>) -> ProtocolMessage {
        self.base(message_type, payload, source, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_id_is_monotonic_per_builder() {
        let mut b = MessageBuilder::new();
        let m1 = b.keyboard("a", "press", None, None);
        let m2 = b.keyboard("b", "release", None, None);
        assert_eq!(m1.sequence_id, 1);
        assert_eq!(m2.sequence_id, 2);
    }

    #[test]
    fn heartbeat_tag_is_uppercase() {
        let mut b = MessageBuilder::new();
        let m = b.heartbeat(None, None);
        assert_eq!(m.message_type, "HEARTBEAT");
        assert!(m.is_heartbeat());
    }

    #[test]
    fn screen_position_parses_from_wire_strings() {
        use std::str::FromStr;
        assert_eq!(ScreenPosition::from_str("left").unwrap(), ScreenPosition::Left);
        assert!(ScreenPosition::from_str("north").is_err());
    }

    #[test]
    fn mouse_payload_shape() {
        let mut b = MessageBuilder::new();
        let m = b.mouse(1.0, 2.0, 3.0, 4.0, "move", false, Some("server".into()), Some("left".into()), None);
        assert_eq!(m.payload.get("x").unwrap().as_f64(), Some(1.0));
        assert_eq!(m.source.as_deref(), Some("server"));
        assert_eq!(m.target.as_deref(), Some("left"));
    }
}
