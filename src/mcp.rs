//! Model Context Protocol plumbing: JSON-RPC 2.0 message types and the
//! dispatcher that maps MCP methods onto the Calendly tools.
//!
//! Only the part of MCP a tools-only server needs is handled: the
//! `initialize` handshake, `ping`, `tools/list` and `tools/call`.
//! Notifications are accepted and never answered.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::calendly::CalendlyApi;
use crate::tools::CalendlyTools;

/// Protocol revision assumed when the client asks for one we do not know
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26"];

pub const SERVER_NAME: &str = "calendly";

/// Incoming JSON-RPC 2.0 message. Requests carry an `id`, notifications do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
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

    pub fn error(id: Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// Transport-independent MCP server
pub struct McpServer<A> {
    tools: CalendlyTools<A>,
}

impl<A: CalendlyApi> McpServer<A> {
    pub fn new(tools: CalendlyTools<A>) -> Self {
        Self { tools }
    }

    /// Handle one raw message. `None` means nothing is sent back.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Discarding unparsable message: {}", e);
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    error_codes::PARSE_ERROR,
                    &format!("parse error: {e}"),
                ));
            }
        };
        self.handle_value(value).await
    }

    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let id_hint = value.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id_hint.unwrap_or(Value::Null),
                    error_codes::INVALID_REQUEST,
                    &format!("invalid request: {e}"),
                ));
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                error_codes::INVALID_REQUEST,
                "invalid request: jsonrpc must be \"2.0\"",
            ));
        }

        // serde folds `"id": null` into None; only a missing id marks a notification
        if id_hint == Some(Value::Null) {
            return Some(JsonRpcResponse::error(
                Value::Null,
                error_codes::INVALID_REQUEST,
                "invalid request: id must not be null",
            ));
        }

        match request.id {
            Some(id) => Some(self.handle_request(id, &request.method, request.params).await),
            None => {
                debug!("Notification {}", request.method);
                None
            }
        }
    }

    async fn handle_request(&self, id: Value, method: &str, params: Option<Value>) -> JsonRpcResponse {
        debug!("Request {} (id {})", method, id);
        match method {
            "initialize" => JsonRpcResponse::success(id, initialize_result(params.as_ref())),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": self.tools.definitions() })),
            "tools/call" => self.call_tool(id, params).await,
            other => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                &format!("method not found: {other}"),
            ),
        }
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    &format!("invalid tools/call params: {e}"),
                )
            }
            None => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    "tools/call requires params",
                )
            }
        };

        match self.tools.call(&params.name, params.arguments, id.clone()).await {
            Ok(output) => {
                let text = output.payload.to_string();
                JsonRpcResponse::success(
                    id,
                    json!({
                        "content": [{ "type": "text", "text": text }],
                        "isError": output.is_error
                    }),
                )
            }
            Err(err) => {
                warn!("Rejected tool call: {}", err);
                JsonRpcResponse::error(id, error_codes::INVALID_PARAMS, &err.to_string())
            }
        }
    }
}

fn initialize_result(params: Option<&Value>) -> Value {
    let requested = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str);
    let protocol_version = match requested {
        Some(version) if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) => version,
        _ => MCP_PROTOCOL_VERSION,
    };

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendly::MockCalendlyApi;
    use crate::config::Credentials;
    use crate::models::EventType;

    fn server(api: MockCalendlyApi, token: Option<&str>) -> McpServer<MockCalendlyApi> {
        let credentials = Credentials::new("CALENDLY_TOKEN", token.map(str::to_string));
        McpServer::new(CalendlyTools::new(api, credentials).unwrap())
    }

    #[tokio::test]
    async fn initialize_negotiates_protocol_version() {
        let server = server(MockCalendlyApi::new(), None);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#)
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "calendly");
        assert!(result["capabilities"]["tools"].is_object());

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"initialize","params":{"protocolVersion":"1999-01-01"}}"#)
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap()["protocolVersion"], MCP_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let server = server(MockCalendlyApi::new(), None);
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn lists_both_tools() {
        let server = server(MockCalendlyApi::new(), None);
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, json!("a"));
        let tools = resp.result.unwrap()["tools"].clone();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["list_event_types", "book_appointment"]);
        assert!(tools[1]["inputSchema"]["properties"]["event_type_uri"].is_object());
    }

    #[tokio::test]
    async fn tool_failures_are_results_not_rpc_errors() {
        let server = server(MockCalendlyApi::new(), None);
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"list_event_types","arguments":{}}}"#)
            .await
            .unwrap();
        assert!(!resp.is_error());

        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        let envelope: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["id"], 3);
        assert_eq!(envelope["error"]["kind"], "config");
    }

    #[tokio::test]
    async fn book_appointment_through_tools_call() {
        let mut api = MockCalendlyApi::new();
        api.expect_event_type()
            .withf(|_, id| id == "123")
            .returning(|_, _| {
                Ok(EventType {
                    name: Some("Intro".to_string()),
                    scheduling_url: Some("https://calendly.com/x/intro".to_string()),
                    ..Default::default()
                })
            });
        let server = server(api, Some("tok"));

        let resp = server
            .handle_value(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {
                    "name": "book_appointment",
                    "arguments": {
                        "event_type_uri": "https://api.calendly.com/event_types/123",
                        "name": "Ann",
                        "email": "a@x.com",
                        "date": "2024-01-05",
                        "time": "10:00"
                    }
                }
            }))
            .await
            .unwrap();

        let result = resp.result.unwrap();
        assert_eq!(result["isError"], false);
        let intent: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(intent["booking_link"], "https://calendly.com/x/intro");
        assert_eq!(intent["preferred_time"], "2024-01-05 10:00");
        assert_eq!(intent["participant"]["name"], "Ann");
    }

    #[tokio::test]
    async fn invalid_arguments_are_invalid_params() {
        let server = server(MockCalendlyApi::new(), Some("tok"));
        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"book_appointment","arguments":{"name":"Ann"}}}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"nope"}}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn protocol_errors() {
        let server = server(MockCalendlyApi::new(), None);

        let resp = server.handle_message("{not json").await.unwrap();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);

        let resp = server
            .handle_message(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, json!(7));
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":8}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, json!(8));
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":9,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#)
            .await
            .expect("null id must be answered");
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);

        let resp = server
            .handle_message(r#"{"jsonrpc":"2.0","id":10,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.result.unwrap(), json!({}));
    }
}
