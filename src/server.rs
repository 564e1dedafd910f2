//! Line-oriented stdio loop.
//!
//! Each non-empty input line is answered with exactly one output line, except
//! JSON-RPC notifications which get none. Two framings share the loop:
//! bare `{"tool", "args"}` requests and JSON-RPC 2.0 (MCP) messages.

use crate::dispatcher::{ToolDispatcher, ToolResponse};
use crate::error::Result;
use serde::Serialize;
use serde_json::{Value, json};
use std::io::{BufRead, Write};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// One output line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Bare `{"ok": ..}` envelope for `{"tool", "args"}` requests.
    Envelope(ToolResponse),
    Rpc(Value),
}

impl Reply {
    pub fn into_value(self) -> Value {
        match self {
            Reply::Envelope(response) => response.to_value(),
            Reply::Rpc(value) => value,
        }
    }
}

pub struct Server {
    dispatcher: ToolDispatcher,
}

impl Server {
    pub fn new(dispatcher: ToolDispatcher) -> Self {
        Self { dispatcher }
    }

    /// EOF까지 요청을 하나씩 처리 (직렬 처리)
    pub fn serve<R: BufRead, W: Write>(&self, mut reader: R, mut writer: W) -> Result<()> {
        let mut handled = 0usize;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            // UTF-8이 아닌 줄도 INVALID_JSON 한 줄로 응답
            let reply = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.reply(line.trim_end_matches(['\r', '\n'])),
                Err(e) => Some(Reply::Envelope(self.dispatcher.reject_undecodable(e))),
            };
            if let Some(reply) = reply {
                serde_json::to_writer(&mut writer, &reply)?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
            handled += 1;
        }
        tracing::info!(handled, "Input closed, shutting down");
        Ok(())
    }

    /// One line in, at most one reply out.
    pub fn reply(&self, line: &str) -> Option<Reply> {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            // 형식을 알 수 없으므로 기본 봉투로 응답
            Err(_) => return Some(Reply::Envelope(self.dispatcher.dispatch_line(line))),
        };

        if is_rpc(&request) {
            return self.handle_rpc(&request).map(Reply::Rpc);
        }
        Some(Reply::Envelope(self.dispatcher.dispatch_request(&request)))
    }

    pub fn handle_line(&self, line: &str) -> Option<Value> {
        self.reply(line).map(Reply::into_value)
    }

    fn handle_rpc(&self, request: &Value) -> Option<Value> {
        let method = request["method"].as_str().unwrap_or_default();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let outcome = match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.dispatcher.catalog() })),
            "tools/call" => self.call_tool(&params),
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        };

        // id가 없으면 알림: 응답하지 않음
        let id = request.get("id").filter(|id| !id.is_null())?.clone();
        Some(match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": message },
            }),
        })
    }

    fn call_tool(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Err((INVALID_PARAMS, "tools/call requires a string \"name\"".to_string()));
        };
        let args = params.get("arguments").unwrap_or(&Value::Null);
        let response = self.dispatcher.dispatch(name, args);
        Ok(tool_result(&response))
    }
}

fn is_rpc(request: &Value) -> bool {
    request.get("jsonrpc").is_some() && request.get("method").is_some()
}

/// MCP `tools/call` 결과: 봉투를 텍스트 콘텐츠로 감쌈
fn tool_result(response: &ToolResponse) -> Value {
    let envelope = response.to_value();
    json!({
        "content": [{ "type": "text", "text": envelope.to_string() }],
        "structuredContent": envelope,
        "isError": !response.is_ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tools::tests::context;

    fn server() -> Server {
        let (ctx, _) = context(Config::default());
        Server::new(ToolDispatcher::with_builtin_tools(ctx))
    }

    fn run(server: &Server, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        server.serve(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn one_line_out_per_request() {
        let s = server();
        let replies = run(
            &s,
            "{\"tool\":\"list_patterns\"}\n\n   \n{oops\n{\"tool\":\"nope\",\"args\":{}}\n",
        );
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["ok"], true);
        assert_eq!(replies[1]["code"], "INVALID_JSON");
        assert_eq!(replies[2]["code"], "UNKNOWN_TOOL");
    }

    #[test]
    fn invalid_utf8_line_gets_envelope() {
        let s = server();
        let mut input = b"{\"tool\":\"cue\",\"args\":{\"tag\":\"".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.extend_from_slice(b"\"}}\n{\"tool\":\"list_patterns\"}\n");

        let mut out = Vec::new();
        s.serve(input.as_slice(), &mut out).unwrap();
        let replies: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["ok"], false);
        assert_eq!(replies[0]["code"], "INVALID_JSON");
        assert_eq!(replies[1]["ok"], true);
    }

    #[test]
    fn envelope_line_starts_with_ok() {
        let s = server();
        let mut out = Vec::new();
        s.serve(r#"{"tool":"set_bpm","args":{"bpm":0}}"#.as_bytes(), &mut out)
            .unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with(r#"{"ok":false,"code":"INVALID_INPUT""#));
    }

    #[test]
    fn rpc_initialize_and_list() {
        let s = server();
        let replies = run(
            &s,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
                "\n"
            ),
        );
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[0]["result"]["serverInfo"]["name"], "cuebridge");
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn rpc_tool_call_wraps_envelope() {
        let s = server();
        let reply = s
            .handle_line(
                r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"get_pattern","arguments":{"category":"bass","pattern_name":"rock"}}}"#,
            )
            .unwrap();
        assert_eq!(reply["id"], "a");
        assert_eq!(reply["result"]["isError"], false);
        assert_eq!(reply["result"]["structuredContent"]["ok"], true);
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let envelope: Value = serde_json::from_str(text).unwrap();
        assert!(envelope["code"].as_str().unwrap().contains(":rock_bass"));
    }

    #[test]
    fn rpc_errors() {
        let s = server();
        let reply = s
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#)
            .unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        let reply = s
            .handle_line(r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{}}"#)
            .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = s
            .handle_line(
                r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"set_bpm","arguments":{"bpm":-1}}}"#,
            )
            .unwrap();
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["structuredContent"]["code"], "INVALID_INPUT");
    }
}
