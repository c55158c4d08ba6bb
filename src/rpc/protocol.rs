//! JSON-RPC 2.0 message types.
//!
//! One message per line on the wire; see [`crate::rpc::server`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Longest frame accepted in either direction.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications; echoed back otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.into(),
            params,
        }
    }

    /// Parse one frame, mapping failures to the matching JSON-RPC error.
    pub fn parse(frame: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(frame).map_err(|e| RpcError::Parse(e.to_string()))?;
        let request: RpcRequest =
            serde_json::from_value(value).map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(RpcError::InvalidRequest(format!(
                "unsupported jsonrpc version {:?}",
                request.jsonrpc
            )));
        }
        Ok(request)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    /// `null` when the request id could not be determined.
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code: error.code(),
                message: error.to_string(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_params() {
        let request = RpcRequest::parse(r#"{"jsonrpc":"2.0","id":7,"method":"get","params":{"id":"a1"}}"#).unwrap();
        assert_eq!(request.id, Some(json!(7)));
        assert_eq!(request.method, "get");
        assert_eq!(request.params, Some(json!({"id": "a1"})));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = RpcRequest::parse("{not json").unwrap_err();
        assert_eq!(err.code(), PARSE_ERROR);
    }

    #[test]
    fn wrong_shape_is_an_invalid_request() {
        let err = RpcRequest::parse(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code(), INVALID_REQUEST);

        let err = RpcRequest::parse(r#"{"jsonrpc":"1.0","id":1,"method":"get"}"#).unwrap_err();
        assert_eq!(err.code(), INVALID_REQUEST);
    }

    #[test]
    fn failure_serialises_without_result() {
        let response = RpcResponse::failure(json!(3), &RpcError::MethodNotFound("nope".into()));
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains(r#""code":-32601"#));
        assert!(!text.contains("result"));
    }

    #[test]
    fn request_without_params_omits_field() {
        let text = serde_json::to_string(&RpcRequest::new(1, "get", None)).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"method":"get"}"#);
    }
}
