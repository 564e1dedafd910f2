use crate::error::CuebridgeError;
use crate::schema::{self, SchemaError};
use crate::tools::{self, Tool, ToolCall, ToolContext, ToolOutput};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// Flat error taxonomy returned as `code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidJson,
    UnknownTool,
    InvalidInput,
    EndpointUnavailable,
    PatternNotFound,
    /// `<TOOL>_ERROR`
    Tool(String),
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> String {
        match self {
            ErrorKind::InvalidJson => "INVALID_JSON".to_string(),
            ErrorKind::UnknownTool => "UNKNOWN_TOOL".to_string(),
            ErrorKind::InvalidInput => "INVALID_INPUT".to_string(),
            ErrorKind::EndpointUnavailable => "ENDPOINT_UNAVAILABLE".to_string(),
            ErrorKind::PatternNotFound => "PATTERN_NOT_FOUND".to_string(),
            ErrorKind::Tool(name) => format!("{}_ERROR", name.to_ascii_uppercase()),
            ErrorKind::Internal => "INTERNAL_ERROR".to_string(),
        }
    }

    fn for_tool_error(tool: &str, err: &CuebridgeError) -> Self {
        match err {
            CuebridgeError::EndpointUnavailable { .. } => ErrorKind::EndpointUnavailable,
            CuebridgeError::PatternNotFound { .. } => ErrorKind::PatternNotFound,
            CuebridgeError::ArgsMismatch { .. } => ErrorKind::Internal,
            _ => ErrorKind::Tool(tool.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Exactly one response per request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse {
    Success(ToolOutput),
    Failure { code: ErrorKind, message: String },
}

impl ToolResponse {
    pub fn failure(code: ErrorKind, message: impl Into<String>) -> Self {
        ToolResponse::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResponse::Success(_))
    }

    pub fn to_value(&self) -> Value {
        match self {
            ToolResponse::Success(fields) => {
                let mut map = Map::new();
                map.insert("ok".into(), Value::Bool(true));
                for (k, v) in fields {
                    if k != "ok" {
                        map.insert(k.clone(), v.clone());
                    }
                }
                Value::Object(map)
            }
            ToolResponse::Failure { code, message } => json!({
                "ok": false,
                "code": code.code(),
                "message": message,
            }),
        }
    }
}

// `ok`가 항상 첫 번째 키로 나오도록 직접 직렬화
impl Serialize for ToolResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolResponse::Success(fields) => {
                let extra = fields.keys().filter(|k| k.as_str() != "ok").count();
                let mut map = serializer.serialize_map(Some(extra + 1))?;
                map.serialize_entry("ok", &true)?;
                for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != "ok") {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            ToolResponse::Failure { code, message } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("code", &code.code())?;
                map.serialize_entry("message", message)?;
                map.end()
            }
        }
    }
}

/// Maps one named tool call to one `ToolResponse`. Never panics outward.
pub struct ToolDispatcher {
    ctx: ToolContext,
    // 등록된 도구 저장소 (이름 -> 도구 객체)
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolDispatcher {
    /// 도구가 하나도 없는 디스패처
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            tools: HashMap::new(),
        }
    }

    /// 기본 도구가 모두 등록된 디스패처
    pub fn with_builtin_tools(ctx: ToolContext) -> Self {
        let mut dispatcher = Self::new(ctx);
        for tool in tools::builtin() {
            dispatcher.tools.insert(tool.name().to_string(), tool);
        }
        dispatcher
    }

    /// 도구 등록 (같은 이름이면 교체)
    pub fn register_tool(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Box::new(tool));
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// `tools/list` 카탈로그: 스키마 테이블 순서, 등록된 도구만
    pub fn catalog(&self) -> Vec<Value> {
        schema::TOOL_SCHEMAS
            .iter()
            .filter(|s| self.tools.contains_key(s.name))
            .map(|s| {
                json!({
                    "name": s.name,
                    "description": s.description,
                    "inputSchema": s.input_schema(),
                })
            })
            .collect()
    }

    /// Handle one raw `{"tool": .., "args": ..}` line.
    pub fn dispatch_line(&self, line: &str) -> ToolResponse {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return self.reject(ErrorKind::InvalidJson, format!("Malformed JSON: {}", e)),
        };
        self.dispatch_request(&request)
    }

    /// 문자열로 디코딩할 수 없는 줄 (UTF-8 아님)
    pub fn reject_undecodable(&self, e: std::str::Utf8Error) -> ToolResponse {
        self.reject(
            ErrorKind::InvalidJson,
            format!("Request line is not valid UTF-8: {}", e),
        )
    }

    /// Handle an already-decoded request object.
    pub fn dispatch_request(&self, request: &Value) -> ToolResponse {
        let Some(name) = request.get("tool").and_then(Value::as_str) else {
            return self.reject(
                ErrorKind::InvalidJson,
                "Request must be an object with a string \"tool\" field",
            );
        };
        let args = request.get("args").unwrap_or(&Value::Null);
        self.dispatch(name, args)
    }

    pub fn dispatch(&self, name: &str, args: &Value) -> ToolResponse {
        let received_at = Instant::now();

        let validated = match schema::validate(name, args) {
            Ok(validated) => validated,
            Err(SchemaError::UnknownTool(tool)) => {
                return self.reject(ErrorKind::UnknownTool, format!("Unknown tool: {}", tool));
            }
            Err(SchemaError::Invalid(e)) => {
                return self.reject(ErrorKind::InvalidInput, format!("Invalid input for {}: {}", name, e));
            }
        };

        let Some(tool) = self.tools.get(name) else {
            return self.reject(ErrorKind::UnknownTool, format!("Tool '{}' is not registered", name));
        };

        let call = ToolCall {
            args: validated,
            received_at,
        };
        // 핸들러 하나가 패닉해도 프로세스는 계속 요청을 처리
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| tool.execute(&self.ctx, call)));
        let elapsed_ms = received_at.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(fields)) => {
                self.ctx
                    .log
                    .debug(format!("Tool {} succeeded in {:.3}ms", name, elapsed_ms));
                ToolResponse::Success(fields)
            }
            Ok(Err(e)) => {
                let kind = ErrorKind::for_tool_error(name, &e);
                self.reject(kind, e.to_string())
            }
            Err(payload) => self.reject(
                ErrorKind::Internal,
                format!("Tool {} panicked: {}", name, panic_message(payload.as_ref())),
            ),
        }
    }

    fn reject(&self, code: ErrorKind, message: impl Into<String>) -> ToolResponse {
        let message = message.into();
        self.ctx.log.warn(format!("{}: {}", code, message));
        ToolResponse::failure(code, message)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
