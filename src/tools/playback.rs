use super::{Tool, ToolCall, ToolContext, ToolOutput, output};
use crate::error::{CuebridgeError, Result};
use crate::job::{Job, JobResult};
use crate::osc::{Channel, OscType};
use crate::schema::ValidatedArgs;
use serde_json::{Value, json};
use std::time::Instant;

/// 코드를 cue 채널로 전송하고 로컬 전송 성공 시점에 job을 완료 처리.
/// `create_and_play`도 같은 경로를 사용합니다.
pub(crate) fn dispatch_job(ctx: &ToolContext, received_at: Instant, source: &str) -> Result<JobResult> {
    let mut job = Job::received(ctx.jobs.next(), received_at);
    job.validated();

    ctx.osc
        .send(Channel::Cue, &ctx.config.paths.run_code, vec![OscType::from(source)])?
        .into_result()?;
    job.sent();

    let result = job.complete();
    ctx.log.info(format!(
        "Job {} completed locally in {:.3}ms ({} bytes of code, delivery unconfirmed)",
        result.job_id,
        result.elapsed_ms,
        source.len()
    ));
    Ok(result)
}

/// Job 응답 필드 (`delivery`는 피어 확인이 없다는 표시)
pub(crate) fn job_fields(result: &JobResult) -> ToolOutput {
    output(json!({
        "job_id": result.job_id,
        "elapsed_ms": result.elapsed_ms,
        "delivery": "unconfirmed",
    }))
}

fn mismatch(tool: &str) -> CuebridgeError {
    CuebridgeError::ArgsMismatch {
        tool: tool.to_string(),
    }
}

pub struct RunCode;

impl RunCode {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for RunCode {
    fn name(&self) -> &'static str {
        "run_code"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::RunCode { source } = call.args else {
            return Err(mismatch(self.name()));
        };
        let result = dispatch_job(ctx, call.received_at, &source)?;
        Ok(job_fields(&result))
    }
}

pub struct StopAll;

impl StopAll {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for StopAll {
    fn name(&self) -> &'static str {
        "stop_all"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::StopAll = call.args else {
            return Err(mismatch(self.name()));
        };
        ctx.osc
            .send(Channel::Command, &ctx.config.paths.stop_all, Vec::new())?
            .into_result()?;
        Ok(ToolOutput::new())
    }
}

pub struct SetBpm;

impl SetBpm {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for SetBpm {
    fn name(&self) -> &'static str {
        "set_bpm"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::SetBpm { bpm } = call.args else {
            return Err(mismatch(self.name()));
        };
        // 검증 단계에서 f32 범위의 양수임을 보장
        let value = bpm.as_f64().unwrap_or_default() as f32;
        ctx.osc
            .send(Channel::Command, &ctx.config.paths.set_bpm, vec![OscType::Float(value)])?
            .into_result()?;
        Ok(output(json!({ "bpm": Value::Number(bpm) })))
    }
}

pub struct Cue;

impl Cue {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for Cue {
    fn name(&self) -> &'static str {
        "cue"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::Cue { tag } = call.args else {
            return Err(mismatch(self.name()));
        };
        ctx.osc
            .send(Channel::Command, &ctx.config.paths.cue, vec![OscType::from(tag.as_str())])?
            .into_result()?;
        Ok(output(json!({ "tag": tag })))
    }
}
