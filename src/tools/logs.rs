use super::{Tool, ToolCall, ToolContext, ToolOutput, output};
use crate::error::{CuebridgeError, Result};
use crate::schema::ValidatedArgs;
use serde_json::json;

pub struct TailLogs;

impl TailLogs {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for TailLogs {
    fn name(&self) -> &'static str {
        "tail_logs"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::TailLogs { since_ms } = call.args else {
            return Err(CuebridgeError::ArgsMismatch {
                tool: self.name().to_string(),
            });
        };
        let entries = ctx.log.tail(since_ms);
        Ok(output(json!({ "entries": serde_json::to_value(entries)? })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tools::tests::{call, context};

    #[test]
    fn returns_entries_since_timestamp() {
        let (ctx, _) = context(Config::default());
        ctx.log.info("one");
        ctx.log.warn("two");
        let cutoff = ctx.log.tail(None)[1].ts;
        ctx.log.error("three");

        let out = TailLogs::new()
            .execute(&ctx, call(ValidatedArgs::TailLogs { since_ms: Some(cutoff) }))
            .unwrap();
        let entries = out["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["message"], "two");
        assert_eq!(entries[0]["level"], "WARN");
        assert_eq!(entries[1]["message"], "three");
    }

    #[test]
    fn tail_is_read_only() {
        let (ctx, _) = context(Config::default());
        ctx.log.info("only");
        for _ in 0..2 {
            TailLogs::new()
                .execute(&ctx, call(ValidatedArgs::TailLogs { since_ms: None }))
                .unwrap();
        }
        assert_eq!(ctx.log.len(), 1);
    }
}
