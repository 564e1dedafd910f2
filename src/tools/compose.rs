use super::playback::{dispatch_job, job_fields};
use super::{Tool, ToolCall, ToolContext, ToolOutput, output};
use crate::error::{CuebridgeError, Result};
use crate::generator::patterns;
use crate::schema::ValidatedArgs;
use serde_json::json;

fn mismatch(tool: &str) -> CuebridgeError {
    CuebridgeError::ArgsMismatch {
        tool: tool.to_string(),
    }
}

pub struct GenerateMusic;

impl GenerateMusic {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for GenerateMusic {
    fn name(&self) -> &'static str {
        "generate_music"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::GenerateMusic { request } = call.args else {
            return Err(mismatch(self.name()));
        };
        let generated = ctx.generator.generate(&request)?;
        ctx.log.info(format!(
            "Generated {} bytes of code for '{}' ({})",
            generated.code.len(),
            request,
            generated.method_used
        ));
        Ok(output(json!({
            "code": generated.code,
            "method_used": generated.method_used,
            "suggestions": ctx.generator.suggestions(&request),
        })))
    }
}

pub struct ListPatterns;

impl ListPatterns {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for ListPatterns {
    fn name(&self) -> &'static str {
        "list_patterns"
    }

    fn execute(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::ListPatterns = call.args else {
            return Err(mismatch(self.name()));
        };
        Ok(output(json!({ "patterns": patterns::catalog() })))
    }
}

pub struct GetPattern;

impl GetPattern {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for GetPattern {
    fn name(&self) -> &'static str {
        "get_pattern"
    }

    fn execute(&self, _ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::GetPattern {
            category,
            pattern_name,
            bpm,
        } = call.args
        else {
            return Err(mismatch(self.name()));
        };
        let pattern = patterns::find(&category, &pattern_name).ok_or_else(|| {
            CuebridgeError::PatternNotFound {
                category: category.clone(),
                name: pattern_name.clone(),
            }
        })?;
        Ok(output(json!({
            "category": pattern.category,
            "pattern_name": pattern.name,
            "bpm": bpm,
            "description": pattern.description,
            "code": pattern.code.replace("{bpm}", &bpm.to_string()),
        })))
    }
}

/// 코드 생성 후 바로 재생 (run_code와 같은 job 수명 주기)
pub struct CreateAndPlay;

impl CreateAndPlay {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for CreateAndPlay {
    fn name(&self) -> &'static str {
        "create_and_play"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::CreateAndPlay { request } = call.args else {
            return Err(mismatch(self.name()));
        };
        let generated = ctx.generator.generate(&request)?;
        let job = dispatch_job(ctx, call.received_at, &generated.code)?;

        let mut out = job_fields(&job);
        out.insert("code".into(), json!(generated.code));
        out.insert("method_used".into(), json!(generated.method_used));
        out.insert("suggestions".into(), json!(ctx.generator.suggestions(&request)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::osc::{OscMessage, OscType};
    use crate::tools::tests::{call, context};
    use std::net::UdpSocket;
    use std::time::Duration;

    #[test]
    fn generate_music_returns_code_and_hints() {
        let (ctx, _) = context(Config::default());
        let out = GenerateMusic::new()
            .execute(
                &ctx,
                call(ValidatedArgs::GenerateMusic {
                    request: "techno drums".into(),
                }),
            )
            .unwrap();
        assert_eq!(out["method_used"], "patterns");
        assert!(out["code"].as_str().unwrap().contains("live_loop :techno_kick"));
        assert!(out["suggestions"].is_array());
    }

    #[test]
    fn list_patterns_groups_by_category() {
        let (ctx, _) = context(Config::default());
        let out = ListPatterns::new().execute(&ctx, call(ValidatedArgs::ListPatterns)).unwrap();
        assert_eq!(out["patterns"]["drums"], json!(["rock", "techno"]));
    }

    #[test]
    fn get_pattern_renders_requested_tempo() {
        let (ctx, _) = context(Config::default());
        let out = GetPattern::new()
            .execute(
                &ctx,
                call(ValidatedArgs::GetPattern {
                    category: "drums".into(),
                    pattern_name: "rock".into(),
                    bpm: 95,
                }),
            )
            .unwrap();
        assert!(out["code"].as_str().unwrap().starts_with("use_bpm 95\n"));
        assert_eq!(out["description"], "Kick and snare backbeat");
    }

    #[test]
    fn get_pattern_unknown_name() {
        let (ctx, _) = context(Config::default());
        let err = GetPattern::new()
            .execute(
                &ctx,
                call(ValidatedArgs::GetPattern {
                    category: "drums".into(),
                    pattern_name: "polka".into(),
                    bpm: 120,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, CuebridgeError::PatternNotFound { ref name, .. } if name == "polka"));
    }

    #[test]
    fn create_and_play_sends_generated_code() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = peer.local_addr().unwrap().port();
        let (ctx, _) = context(Config {
            cue_port: port,
            ..Config::default()
        });

        let out = CreateAndPlay::new()
            .execute(
                &ctx,
                call(ValidatedArgs::CreateAndPlay {
                    request: "rock bass".into(),
                }),
            )
            .unwrap();
        assert!(out["job_id"].is_string());
        assert_eq!(out["delivery"], "unconfirmed");

        let mut buf = [0u8; 4096];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        let msg = OscMessage::decode(&buf[..n]).unwrap();
        assert_eq!(msg.addr, "/run-code");
        assert_eq!(msg.args, vec![OscType::from(out["code"].as_str().unwrap())]);
    }
}
