//! Gateway WebSocket wire types: handshake (hello/reject) and RPC frames.
//!
//! Inbound JSON frames are distinguished only by their `type` field, so
//! [`parse_inbound`] sniffs the tag and yields a typed variant; anything it
//! does not recognize comes back as [`InboundFrame::Unrecognized`] and the
//! transport decides what that means for its current phase.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol versions this client can speak.
pub const PROTOCOL_MIN: u32 = 1;
pub const PROTOCOL_MAX: u32 = 1;

/// Inclusive protocol version range advertised in the client hello.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProtocolRange {
    pub min: u32,
    pub max: u32,
}

/// Outbound handshake frame, sent once immediately after socket open:
/// `{ "protocol": {min,max}, "client_id", "auth_token"?, "capabilities" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol: ProtocolRange,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub capabilities: Vec<String>,
}

impl ClientHello {
    pub fn new(
        client_id: impl Into<String>,
        auth_token: Option<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            protocol: ProtocolRange {
                min: PROTOCOL_MIN,
                max: PROTOCOL_MAX,
            },
            client_id: client_id.into(),
            auth_token,
            capabilities,
        }
    }
}

/// A service the gateway exposes (e.g. chat, terminal). Informational for
/// downstream collaborators; the transport only stores the list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service: String,
    pub version: String,
}

/// Handshake success: `{ "type": "hello", "protocol_version", "server_id", ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    #[serde(rename = "type")]
    pub typ: String,
    pub protocol_version: u32,
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

/// Why the gateway refused the handshake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    VersionMismatch,
    Unauthorized,
    ServerError,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectCode::VersionMismatch => "version_mismatch",
            RejectCode::Unauthorized => "unauthorized",
            RejectCode::ServerError => "server_error",
        };
        f.write_str(s)
    }
}

/// Handshake failure: `{ "type": "reject", "code", "reason" }`. A reject ends
/// the current start() cycle; reconnection stays off until the next start().
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloReject {
    #[serde(rename = "type")]
    pub typ: String,
    pub code: RejectCode,
    pub reason: String,
}

/// Client RPC request: `{ "type": "request", "id", "method", "params"? }`.
/// The id is client-generated and only used for correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            typ: "request".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Structured error carried by a failed RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
}

/// Server RPC response: `{ "type": "response", "id", "result"? , "error"? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Unsolicited server push: `{ "type": "event", "topic", "params"? }`.
/// Never matched against pending calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEvent {
    #[serde(rename = "type")]
    pub typ: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// One inbound JSON frame, sniffed by its `type` tag.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Hello(ServerHello),
    Reject(HelloReject),
    Response(RpcResponse),
    Event(RpcEvent),
    /// Not JSON, no known tag, or a known tag with an invalid body.
    Unrecognized,
}

/// Parse one inbound text frame. Unknown or malformed shapes are not an
/// error here; the transport ignores them after the handshake and treats
/// them as a protocol violation during it.
pub fn parse_inbound(text: &str) -> InboundFrame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return InboundFrame::Unrecognized,
    };
    let typ = value.get("type").and_then(|v| v.as_str()).unwrap_or_default();
    match typ {
        "hello" => serde_json::from_value(value)
            .map(InboundFrame::Hello)
            .unwrap_or(InboundFrame::Unrecognized),
        "reject" => serde_json::from_value(value)
            .map(InboundFrame::Reject)
            .unwrap_or(InboundFrame::Unrecognized),
        "response" => serde_json::from_value(value)
            .map(InboundFrame::Response)
            .unwrap_or(InboundFrame::Unrecognized),
        "event" => serde_json::from_value(value)
            .map(InboundFrame::Event)
            .unwrap_or(InboundFrame::Unrecognized),
        _ => InboundFrame::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_hello_wire_shape() {
        let hello = ClientHello::new("web-1", Some("tok".to_string()), vec!["chat".into()]);
        let value = serde_json::to_value(&hello).expect("serialize");
        assert_eq!(
            value,
            json!({
                "protocol": { "min": 1, "max": 1 },
                "client_id": "web-1",
                "auth_token": "tok",
                "capabilities": ["chat"]
            })
        );
    }

    #[test]
    fn client_hello_omits_absent_token() {
        let hello = ClientHello::new("web-1", None, vec![]);
        let value = serde_json::to_value(&hello).expect("serialize");
        assert!(value.get("auth_token").is_none());
    }

    #[test]
    fn parses_server_hello() {
        let text = r#"{"type":"hello","protocol_version":1,"server_id":"gw-1",
            "services":[{"service":"chat","version":"1.0"}]}"#;
        match parse_inbound(text) {
            InboundFrame::Hello(h) => {
                assert_eq!(h.protocol_version, 1);
                assert_eq!(h.server_id, "gw-1");
                assert_eq!(h.identity, None);
                assert_eq!(h.services.len(), 1);
                assert_eq!(h.services[0].service, "chat");
            }
            other => panic!("expected hello, got {:?}", other),
        }
    }

    #[test]
    fn parses_reject() {
        let text = r#"{"type":"reject","code":"unauthorized","reason":"bad token"}"#;
        match parse_inbound(text) {
            InboundFrame::Reject(r) => {
                assert_eq!(r.code, RejectCode::Unauthorized);
                assert_eq!(r.reason, "bad token");
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn parses_response_with_error() {
        let text = r#"{"type":"response","id":"abc","error":{"code":"not_found","message":"no such chat"}}"#;
        match parse_inbound(text) {
            InboundFrame::Response(r) => {
                assert_eq!(r.id, "abc");
                assert!(r.result.is_none());
                let err = r.error.expect("error body");
                assert_eq!(err.code, "not_found");
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn parses_event() {
        let text = r#"{"type":"event","topic":"chat.message","params":{"id":7}}"#;
        match parse_inbound(text) {
            InboundFrame::Event(e) => {
                assert_eq!(e.topic, "chat.message");
                assert_eq!(e.params, Some(json!({"id": 7})));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn unknown_shapes_are_unrecognized() {
        for text in [
            "not json",
            r#"{"no_type":true}"#,
            r#"{"type":"ping"}"#,
            // Known tag, invalid body.
            r#"{"type":"hello","protocol_version":"one"}"#,
            r#"{"type":"reject","code":"weather","reason":"rain"}"#,
        ] {
            assert!(
                matches!(parse_inbound(text), InboundFrame::Unrecognized),
                "expected unrecognized for {}",
                text
            );
        }
    }
}
