// src/tools/mod.rs

use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::generator::CodeGenerator;
use crate::job::JobIds;
use crate::log::RingLog;
use crate::osc::OscClient;
use crate::schema::ValidatedArgs;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

pub mod compose;
pub mod diagnose;
pub mod logs;
pub mod playback;

/// 툴 핸들러가 공유하는 프로세스 상태.
/// 시작 시 한 번 만들어지고 디스패처가 소유합니다.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub log: Arc<RingLog>,
    pub osc: Arc<OscClient>,
    pub diagnostics: Diagnostics,
    pub generator: Box<dyn CodeGenerator>,
    pub jobs: JobIds,
}

/// One validated invocation handed to a tool.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub args: ValidatedArgs,
    /// When the request line was received (job latency is measured from here).
    pub received_at: Instant,
}

/// Success payload fields (the dispatcher adds `ok: true`).
pub type ToolOutput = Map<String, Value>;

/// 모든 도구가 구현해야 하는 인터페이스.
/// 인자 검증은 스키마 테이블이 먼저 끝내므로 `execute`는 타입이 확정된 인자만 받습니다.
pub trait Tool: Send + Sync {
    /// 도구의 고유 이름 (예: "run_code", "set_bpm")
    fn name(&self) -> &'static str;

    /// 도구 실행 로직
    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput>;
}

/// Every built-in tool, in catalog order.
pub fn builtin() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(playback::RunCode::new()),
        Box::new(playback::StopAll::new()),
        Box::new(playback::SetBpm::new()),
        Box::new(playback::Cue::new()),
        Box::new(logs::TailLogs::new()),
        Box::new(diagnose::Diagnose::new()),
        Box::new(compose::GenerateMusic::new()),
        Box::new(compose::ListPatterns::new()),
        Box::new(compose::GetPattern::new()),
        Box::new(compose::CreateAndPlay::new()),
    ]
}

/// `json!` 객체를 출력 맵으로 변환
pub(crate) fn output(value: Value) -> ToolOutput {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::PortDiscovery;
    use crate::discovery::tests::StaticTable;
    use crate::generator::PatternGenerator;
    use crate::log::LogLevel;
    use crate::osc::EndpointTable;

    /// 고정 소켓 테이블을 쓰는 테스트용 컨텍스트
    pub fn context(config: Config) -> (ToolContext, Arc<StaticTable>) {
        let config = Arc::new(config);
        let log = Arc::new(RingLog::new(config.log.max_entries, LogLevel::Debug));
        let table = Arc::new(StaticTable::with(Vec::new()));
        let discovery = Arc::new(
            PortDiscovery::new(&config, Box::new(Arc::clone(&table)), Arc::clone(&log)).unwrap(),
        );
        let osc = Arc::new(OscClient::new(
            Arc::clone(&config),
            Arc::new(EndpointTable::new()),
            Arc::clone(&discovery),
            Arc::clone(&log),
        ));
        let diagnostics = Diagnostics::new(
            Arc::clone(&config),
            discovery,
            Arc::clone(&osc),
            Arc::clone(&log),
        );
        let ctx = ToolContext {
            config,
            log,
            osc,
            diagnostics,
            generator: Box::new(PatternGenerator::new()),
            jobs: JobIds::new(),
        };
        (ctx, table)
    }

    pub fn call(args: ValidatedArgs) -> ToolCall {
        ToolCall {
            args,
            received_at: Instant::now(),
        }
    }

    #[test]
    fn builtin_names_match_schema_table() {
        let names: Vec<&str> = builtin().iter().map(|t| t.name()).collect();
        let schema_names: Vec<&str> = crate::schema::TOOL_SCHEMAS.iter().map(|s| s.name).collect();
        assert_eq!(names, schema_names);
    }
}
