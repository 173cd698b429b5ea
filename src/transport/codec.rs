//! JSON-RPC envelope shared by both transports.
//!
//! Line format (stdio): one compact JSON object per `\n`-terminated line.
//! ```text
//! → {"jsonrpc":"2.0","id":7,"method":"iam:ListUsers","params":{...}}
//! ← {"jsonrpc":"2.0","id":7,"result":{...}}
//! ← {"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"..."}}
//! ```
//! Requests without an `id` are notifications and get no response.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";
/// Protocol version offered during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";

/// Outgoing request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn call(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params: Value::Null,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Incoming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    /// Present only on server-initiated requests, which are not responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Numeric request id, accepting ids echoed back as strings.
    pub fn request_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Unwrap the result, turning an error object into [`Error::Protocol`].
    pub fn into_result(self, tool: &str) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::protocol(
                tool,
                format!("rpc error {}: {}", err.code, err.message),
            )),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Serialize a request as one line, newline included.
pub fn encode_line(request: &RpcRequest) -> Result<String> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

/// Parse one response line.
pub fn decode_line(line: &str) -> std::result::Result<RpcResponse, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Server metadata returned by the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    pub protocol_version: String,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    pub capabilities: Value,
}

/// Parameters sent with `initialize`.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {},
    })
}

/// Interpret an `initialize` result.
pub fn parse_handshake(tool: &str, result: &Value) -> Result<HandshakeInfo> {
    let protocol_version = result
        .get("protocolVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol(tool, "handshake result missing protocolVersion"))?;
    let server_info = result.get("serverInfo");
    Ok(HandshakeInfo {
        protocol_version: protocol_version.to_string(),
        server_name: server_info
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        server_version: server_info
            .and_then(|s| s.get("version"))
            .and_then(Value::as_str)
            .map(str::to_string),
        capabilities: result.get("capabilities").cloned().unwrap_or(Value::Null),
    })
}
