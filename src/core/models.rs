// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire and domain models for the contract harness.
//!
//! This module contains pure data structures for JSON-RPC framing and the
//! subset of MCP results the harness inspects. It is free of I/O side effects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::constants::jsonrpc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(Value::from(id)),
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            method: method.to_string(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc::VERSION.to_string(),
            result: None,
            error: Some(ProtocolError::new(code, message)),
            id,
        }
    }

    /// Numeric correlation id, if the peer echoed one back.
    ///
    /// Ids serialized as decimal strings are accepted as well.
    pub fn correlation_id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A well-formed JSON-RPC error object sent by the server.
///
/// Returned to callers as data; it never fails a session on its own.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("protocol error {code}: {message}")]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// One inbound message after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    /// Server-to-client request that expects an answer
    Request(JsonRpcRequest),
    Notification(JsonRpcRequest),
}

impl IncomingMessage {
    /// Classify a decoded JSON value, rejecting anything that is not JSON-RPC 2.0.
    pub fn classify(value: Value) -> Result<Self, String> {
        let Some(object) = value.as_object() else {
            return Err(format!("expected a JSON object, got {}", kind_of(&value)));
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(jsonrpc::VERSION) {
            return Err("missing or unsupported \"jsonrpc\" version".to_string());
        }

        if object.contains_key("method") {
            let request: JsonRpcRequest =
                serde_json::from_value(value).map_err(|e| format!("invalid request: {e}"))?;
            return Ok(if request.is_notification() {
                Self::Notification(request)
            } else {
                Self::Request(request)
            });
        }

        if !object.contains_key("id") {
            return Err("response without \"id\"".to_string());
        }

        // Decided on key presence: `"result": null` is a valid success
        let has_result = object.contains_key("result");
        let has_error = object.contains_key("error");
        match (has_result, has_error) {
            (true, true) => {
                return Err("response carries both \"result\" and \"error\"".to_string())
            }
            (false, false) => {
                return Err("response carries neither \"result\" nor \"error\"".to_string())
            }
            _ => {}
        }

        let mut response: JsonRpcResponse =
            serde_json::from_value(value).map_err(|e| format!("invalid response: {e}"))?;
        if has_error && response.error.is_none() {
            return Err("response carries a null \"error\"".to_string());
        }
        if has_result && response.result.is_none() {
            response.result = Some(Value::Null);
        }
        Ok(Self::Response(response))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// MCP results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<Implementation>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Capabilities advertised by the server.
///
/// MCP encodes each capability as an object whose presence is the flag, so
/// `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

impl ServerCapabilities {
    pub fn has_tools(&self) -> bool {
        declared(&self.tools)
    }

    pub fn has_resources(&self) -> bool {
        declared(&self.resources)
    }

    pub fn declares_any(&self) -> bool {
        self.has_tools()
            || self.has_resources()
            || declared(&self.prompts)
            || declared(&self.logging)
            || self.other.values().any(|v| !v.is_null())
    }
}

fn declared(capability: &Option<Value>) -> bool {
    capability.as_ref().is_some_and(|v| !v.is_null())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Listing results that may continue on another page.
pub trait Paginated {
    type Item;

    fn into_page(self) -> (Vec<Self::Item>, Option<String>);
}

impl Paginated for ListToolsResult {
    type Item = Tool;

    fn into_page(self) -> (Vec<Tool>, Option<String>) {
        (self.tools, self.next_cursor)
    }
}

impl Paginated for ListResourcesResult {
    type Item = Resource;

    fn into_page(self) -> (Vec<Resource>, Option<String>) {
        (self.resources, self.next_cursor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextResourceContents {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobResourceContents {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    Text(TextResourceContents),
    Blob(BlobResourceContents),
}

impl ResourceContents {
    pub fn uri(&self) -> &str {
        match self {
            Self::Text(t) => &t.uri,
            Self::Blob(b) => &b.uri,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

impl ReadResourceResult {
    pub fn text_contents(&self) -> impl Iterator<Item = &TextResourceContents> {
        self.contents.iter().filter_map(|c| match c {
            ResourceContents::Text(t) => Some(t),
            ResourceContents::Blob(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_response_and_requests() {
        let resp = IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": 3, "result": {}}));
        assert!(matches!(resp, Ok(IncomingMessage::Response(ref r)) if r.correlation_id() == Some(3)));

        let req = IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": "a", "method": "ping"}));
        assert!(matches!(req, Ok(IncomingMessage::Request(_))));

        let note = IncomingMessage::classify(
            json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
        );
        assert!(matches!(note, Ok(IncomingMessage::Notification(_))));
    }

    #[test]
    fn test_classify_rejects_malformed() {
        assert!(IncomingMessage::classify(json!([1, 2])).is_err());
        assert!(IncomingMessage::classify(json!({"id": 1, "result": {}})).is_err());
        assert!(IncomingMessage::classify(json!({"jsonrpc": "2.0", "result": {}})).is_err());
        assert!(IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": 1})).is_err());
        assert!(IncomingMessage::classify(
            json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "x"}})
        )
        .is_err());
    }

    #[test]
    fn test_null_result_is_a_success() {
        let msg = IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": 4, "result": null}));
        match msg {
            Ok(IncomingMessage::Response(r)) => {
                assert_eq!(r.result, Some(Value::Null));
                assert!(r.error.is_none());
            }
            other => panic!("unexpected classification: {other:?}"),
        }

        assert!(IncomingMessage::classify(json!({"jsonrpc": "2.0", "id": 4, "error": null})).is_err());
    }

    #[test]
    fn test_string_ids_correlate() {
        let resp = JsonRpcResponse::success(json!("17"), json!({}));
        assert_eq!(resp.correlation_id(), Some(17));
        let resp = JsonRpcResponse::success(json!(null), json!({}));
        assert_eq!(resp.correlation_id(), None);
    }

    #[test]
    fn test_capability_presence() {
        let caps: ServerCapabilities =
            serde_json::from_value(json!({"tools": {}, "resources": null, "experimental": {}}))
                .unwrap();
        assert!(caps.has_tools());
        assert!(!caps.has_resources());
        assert!(caps.declares_any());
        assert!(!ServerCapabilities::default().declares_any());
    }

    #[test]
    fn test_resource_contents_untagged() {
        let result: ReadResourceResult = serde_json::from_value(json!({
            "contents": [
                {"uri": "x://a", "mimeType": "text/markdown", "text": "# A"},
                {"uri": "x://a", "blob": "AAAA"}
            ]
        }))
        .unwrap();
        assert_eq!(result.text_contents().count(), 1);
        assert_eq!(result.contents[1].uri(), "x://a");
    }

    #[test]
    fn test_notification_serializes_without_id() {
        let note = JsonRpcRequest::notification("notifications/initialized", None);
        let text = serde_json::to_string(&note).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(!text.contains("\"params\""));
    }
}
