use super::{Tool, ToolCall, ToolContext, ToolOutput, output};
use crate::error::{CuebridgeError, Result};
use crate::schema::ValidatedArgs;

pub struct Diagnose;

impl Diagnose {
    pub fn new() -> Self {
        Self
    }
}

impl Tool for Diagnose {
    fn name(&self) -> &'static str {
        "diagnose"
    }

    fn execute(&self, ctx: &ToolContext, call: ToolCall) -> Result<ToolOutput> {
        let ValidatedArgs::Diagnose = call.args else {
            return Err(CuebridgeError::ArgsMismatch {
                tool: self.name().to_string(),
            });
        };
        let report = ctx.diagnostics.run();
        Ok(output(serde_json::to_value(report)?))
    }
}
