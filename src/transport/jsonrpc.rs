// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC 2.0 message helpers shared by the transports.
//!
//! Both transports speak the same method set (`initialize`,
//! `notifications/initialized`, `tools/list`, `tools/call`); they differ only
//! in how a request reaches the provider. [`RpcChannel`] captures that
//! difference so the handshake and call logic live here once.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::error::TransportError;
use super::types::{Content, ServerCapabilities, ServerInfo, ToolDescriptor, ToolOutput};
use super::Handshake;

/// JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Client name sent in `initialize`.
pub const CLIENT_NAME: &str = "toolbridge";

/// Upper bound on `tools/list` pages followed during a handshake.
const MAX_TOOL_PAGES: usize = 64;

/// A request/notification path to one provider.
#[async_trait]
pub(crate) trait RpcChannel: Send + Sync {
    /// Send a request and wait for its `result` (errors already unwrapped).
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Send a notification.
    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError>;
}

/// Build a request message.
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build a notification message.
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": method,
        "params": params
    })
}

/// Parameters for the `initialize` request.
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Numeric id of a response, if the message is one.
pub fn response_id(message: &Value) -> Option<u64> {
    if message.get("method").is_some() {
        return None;
    }
    message.get("id").and_then(Value::as_u64)
}

/// Unwrap a response into its `result`, mapping `error` to [`TransportError::Protocol`].
pub fn into_result(mut response: Value) -> Result<Value, TransportError> {
    if let Some(error) = response.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(TransportError::protocol(code, message));
    }

    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(TransportError::invalid("response has neither result nor error")),
    }
}

/// Read server information from an `initialize` result.
pub fn parse_server_info(result: &Value) -> ServerInfo {
    let info = result.get("serverInfo");
    let field = |key: &str| {
        info.and_then(|i| i.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let defaults = ServerInfo::default();

    ServerInfo {
        name: field("name").unwrap_or(defaults.name),
        version: field("version").unwrap_or(defaults.version),
        capabilities: result
            .get("capabilities")
            .map(ServerCapabilities::from_value)
            .unwrap_or_default(),
        protocol_version: result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .map(str::to_string),
        instructions: result
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Read one tool definition from a `tools/list` entry.
pub fn parse_tool(provider: &str, value: &Value) -> Result<ToolDescriptor, TransportError> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TransportError::invalid("tool definition without a name"))?;

    let hint = |key: &str| {
        value
            .get("annotations")
            .and_then(|a| a.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };

    let mut tool = ToolDescriptor::new(name, provider);
    if let Some(description) = value.get("description").and_then(Value::as_str) {
        tool.description = description.to_string();
    }
    if let Some(schema) = value.get("inputSchema").filter(|s| s.is_object()) {
        tool.input_schema = schema.clone();
    }
    tool.read_only = hint("readOnlyHint");
    tool.destructive = hint("destructiveHint");
    tool.idempotent = hint("idempotentHint");
    Ok(tool)
}

/// Read one `tools/list` page: the tools and the next cursor.
pub fn parse_tools_page(
    provider: &str,
    result: &Value,
) -> Result<(Vec<ToolDescriptor>, Option<String>), TransportError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::invalid("tools/list result without a tools array"))?
        .iter()
        .map(|t| parse_tool(provider, t))
        .collect::<Result<Vec<_>, _>>()?;

    let cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok((tools, cursor))
}

/// Read a `tools/call` result. Unknown content block types are skipped.
pub fn parse_call_result(result: &Value) -> Result<ToolOutput, TransportError> {
    if !result.is_object() {
        return Err(TransportError::invalid("tools/call result is not an object"));
    }

    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| match serde_json::from_value::<Content>(block.clone()) {
                    Ok(content) => Some(content),
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unsupported content block");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ToolOutput {
        content,
        structured: result
            .get("structuredContent")
            .filter(|v| !v.is_null())
            .cloned(),
        is_error: result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Run the protocol handshake: `initialize`, `notifications/initialized`,
/// then every `tools/list` page.
pub(crate) async fn handshake(
    channel: &dyn RpcChannel,
    provider: &str,
) -> Result<Handshake, TransportError> {
    let result = channel.request("initialize", initialize_params()).await?;
    let server_info = parse_server_info(&result);
    channel
        .notify("notifications/initialized", json!({}))
        .await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_TOOL_PAGES {
        let params = match &cursor {
            Some(c) => json!({ "cursor": c }),
            None => json!({}),
        };
        let page = channel.request("tools/list", params).await?;
        let (mut batch, next) = parse_tools_page(provider, &page)?;
        tools.append(&mut batch);

        match next {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }

    tracing::debug!(
        provider = %provider,
        server = %server_info.name,
        tools = tools.len(),
        "handshake complete"
    );
    Ok(Handshake { server_info, tools })
}

/// Invoke a tool with `tools/call`.
pub(crate) async fn call_tool(
    channel: &dyn RpcChannel,
    tool: &str,
    args: Value,
) -> Result<ToolOutput, TransportError> {
    let arguments = if args.is_null() { json!({}) } else { args };
    let result = channel
        .request("tools/call", json!({ "name": tool, "arguments": arguments }))
        .await?;
    parse_call_result(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_request_shape() {
        let msg = request(7, "tools/list", json!({}));
        assert_eq!(msg["jsonrpc"], "2.0");
        assert_eq!(msg["id"], 7);
        assert_eq!(msg["method"], "tools/list");
        assert_eq!(response_id(&msg), None);

        let note = notification("notifications/initialized", json!({}));
        assert!(note.get("id").is_none());
    }

    #[test]
    fn test_into_result() {
        let ok = into_result(json!({ "jsonrpc": "2.0", "id": 1, "result": { "x": 1 } })).unwrap();
        assert_eq!(ok["x"], 1);

        let err = into_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "Method not found" }
        }))
        .unwrap_err();
        assert!(matches!(err, TransportError::Protocol { code: -32601, .. }));

        assert!(into_result(json!({ "jsonrpc": "2.0", "id": 1 })).is_err());

        let err = into_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 4_294_934_695_i64, "message": "out of range" }
        }))
        .unwrap_err();
        assert!(matches!(err, TransportError::Protocol { code: -1, .. }));
    }

    #[test]
    fn test_parse_server_info() {
        let info = parse_server_info(&json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "fs", "version": "1.2.0" },
            "instructions": "Use absolute paths."
        }));
        assert_eq!(info.name, "fs");
        assert_eq!(info.version, "1.2.0");
        assert!(info.capabilities.tools);
        assert_eq!(info.protocol_version.as_deref(), Some("2025-03-26"));
        assert_eq!(info.instructions.as_deref(), Some("Use absolute paths."));

        let info = parse_server_info(&json!({}));
        assert_eq!(info.name, "unknown");
    }

    #[test]
    fn test_parse_tools_page() {
        let (tools, cursor) = parse_tools_page(
            "fs",
            &json!({
                "tools": [
                    {
                        "name": "read_file",
                        "description": "Read a file",
                        "inputSchema": { "type": "object", "properties": { "path": { "type": "string" } } },
                        "annotations": { "readOnlyHint": true, "idempotentHint": true }
                    },
                    { "name": "bare" }
                ],
                "nextCursor": "page-2"
            }),
        )
        .unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].provider, "fs");
        assert!(tools[0].read_only);
        assert!(tools[0].idempotent);
        assert!(!tools[0].destructive);
        assert_eq!(tools[1].description, "");
        assert_eq!(tools[1].input_schema["type"], "object");
        assert_eq!(cursor.as_deref(), Some("page-2"));

        assert!(parse_tools_page("fs", &json!({ "tools": [{ "description": "x" }] })).is_err());
    }

    #[test]
    fn test_parse_call_result_skips_unknown_blocks() {
        let output = parse_call_result(&json!({
            "content": [
                { "type": "text", "text": "ok" },
                { "type": "audio", "data": "...", "mimeType": "audio/wav" }
            ],
            "isError": true
        }))
        .unwrap();
        assert_eq!(output.content.len(), 1);
        assert!(output.is_error);
        assert_eq!(output.as_text(), "ok");
    }

    /// Scripted channel answering `tools/list` in two pages.
    struct ScriptedChannel {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcChannel for ScriptedChannel {
        async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
            self.calls.lock().push(method.to_string());
            match method {
                "initialize" => Ok(json!({ "serverInfo": { "name": "scripted", "version": "1" } })),
                "tools/list" if params.get("cursor").is_none() => Ok(json!({
                    "tools": [{ "name": "a" }],
                    "nextCursor": "2"
                })),
                "tools/list" => Ok(json!({ "tools": [{ "name": "b" }] })),
                "tools/call" => Ok(json!({
                    "content": [{ "type": "text", "text": params["arguments"]["msg"] }]
                })),
                other => Err(TransportError::protocol(-32601, other)),
            }
        }

        async fn notify(&self, method: &str, _params: Value) -> Result<(), TransportError> {
            self.calls.lock().push(method.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handshake_follows_pages() {
        let channel = ScriptedChannel {
            calls: Mutex::new(Vec::new()),
        };
        let handshake = handshake(&channel, "p").await.unwrap();

        assert_eq!(handshake.server_info.name, "scripted");
        let names: Vec<_> = handshake.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(
            *channel.calls.lock(),
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
        );

        let output = call_tool(&channel, "echo", json!({ "msg": "hi" })).await.unwrap();
        assert_eq!(output.as_text(), "hi");
    }
}
