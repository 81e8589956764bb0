//! JSON-RPC 2.0 message types and the `{success, data|error}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::RefKeeperError;

/// A JSON-RPC 2.0 request received from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; must be `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier. Absent (null) for notifications.
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }
}

/// A JSON-RPC 2.0 response sent back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: ErrorCode, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: code.as_i32(),
                message,
                data: None,
            }),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

/// `{"success": true, "data": ..}`
pub fn ok_envelope(data: Value) -> Value {
    json!({ "success": true, "data": data })
}

/// `{"success": false, "error": .., "status": ..}`, with field messages for
/// validation failures.
pub fn error_envelope(err: &RefKeeperError) -> Value {
    let mut envelope = json!({
        "success": false,
        "error": err.to_string(),
        "status": err.status_code(),
    });
    if let RefKeeperError::Validation { errors, .. } = err {
        envelope["fields"] = errors
            .iter()
            .map(|e| json!({ "field": e.field, "message": e.message }))
            .collect();
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification_without_id() {
        let request: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert!(request.is_notification());
        assert!(request.params.is_none());
    }

    #[test]
    fn test_error_response_omits_result() {
        let response = JsonRpcResponse::error(
            json!(1),
            ErrorCode::MethodNotFound,
            "method not found: nope".to_string(),
        );
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains("-32601"));
        assert!(!text.contains("\"result\""));
    }

    #[test]
    fn test_error_envelope_carries_status_and_fields() {
        let err = RefKeeperError::validation("leads", "mobile", "is required");
        let envelope = error_envelope(&err);
        assert_eq!(envelope["success"], json!(false));
        assert_eq!(envelope["status"], json!(400));
        assert_eq!(envelope["fields"][0]["field"], json!("mobile"));

        let missing = RefKeeperError::NotFound {
            entity: "deal".to_string(),
            id: "x".to_string(),
        };
        assert_eq!(error_envelope(&missing)["status"], json!(404));
    }
}
