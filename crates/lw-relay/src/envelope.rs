//! Request/response envelopes exchanged over a relay channel.

use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn generate_message_id() -> String {
    lw_ident::KeyGenerator::new().generate_uid(12, &Default::default())
}

/// A request sent from a client to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Correlates a request with its eventual response.
    #[serde(default = "generate_message_id")]
    pub message_id: String,
    /// Logical endpoint name (e.g. `"connect"`, `"bash"`,
    /// `"register_bash_listener"`).
    pub endpoint: String,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl IpcRequest {
    /// Construct a request with a fresh message id.
    pub fn new(endpoint: impl Into<String>, data: Value) -> Self {
        Self {
            message_id: generate_message_id(),
            endpoint: endpoint.into(),
            data,
        }
    }

    /// Serialize to a single line of JSON (no trailing newline).
    pub fn to_line(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::InvalidEnvelope {
            reason: e.to_string(),
        })
    }
}

/// A response sent back from a channel to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Echoes the request's `message_id`.
    pub message_id: String,
    /// HTTP-style status code (`200`/`204` success, anything else failure).
    pub status: u16,
    /// Endpoint-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl IpcResponse {
    /// Construct a success response.
    pub fn ok(message_id: impl Into<String>, data: Value) -> Self {
        Self {
            message_id: message_id.into(),
            status: 200,
            data,
        }
    }

    /// Construct an error response.
    pub fn error(message_id: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status,
            data: serde_json::json!({ "error": message.into() }),
        }
    }

    /// Parse a single line of JSON into a response, or an [`RelayError::InvalidEnvelope`]
    /// if it doesn't parse.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::InvalidEnvelope {
            reason: e.to_string(),
        })
    }

    /// Serialize to a single line of JSON (no trailing newline).
    pub fn to_line(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::InvalidEnvelope {
            reason: e.to_string(),
        })
    }

    /// Whether this response's status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 204)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = IpcRequest::new("connect", serde_json::json!({}));
        let line = req.to_line().unwrap();
        let parsed: IpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.endpoint, "connect");
        assert_eq!(parsed.message_id, req.message_id);
    }

    #[test]
    fn response_parse_rejects_malformed_json() {
        let err = IpcResponse::parse("not json").unwrap_err();
        assert!(matches!(err, RelayError::InvalidEnvelope { .. }));
    }

    #[test]
    fn response_success_status_codes() {
        let ok = IpcResponse::ok("m1", serde_json::json!({}));
        assert!(ok.is_success());
        let err = IpcResponse::error("m1", 500, "boom");
        assert!(!err.is_success());
    }
}
