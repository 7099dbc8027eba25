//! Debug module - Print debug messages and variable values
//!
//! Runs entirely on the control node. `msg` is rendered like any other
//! parameter; `var` is evaluated as an expression so that
//! `var: result.stdout` shows the value itself.

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, Placement,
};
use async_trait::async_trait;
use serde_json::Value;

/// Module for printing debug messages and variable values
pub struct DebugModule;

impl DebugModule {
    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            _ => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        }
    }
}

#[async_trait]
impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn placement(&self) -> Placement {
        Placement::Controller
    }

    fn supports_check_mode(&self) -> bool {
        true
    }

    fn expression_params(&self) -> &[&'static str] {
        &["var"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if params.contains_key("msg") && params.contains_key("var") {
            return Err(ModuleError::InvalidParameter(
                "'msg' and 'var' are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let output = match (params.get("msg"), params.get("var")) {
            (_, Some(value)) => {
                ModuleOutput::ok(Self::format_value(value)).with_data("var", value.clone())
            }
            (Some(msg), None) => ModuleOutput::ok(Self::format_value(msg)),
            (None, None) => ModuleOutput::ok("Hello world!"),
        };

        tracing::info!(host = %context.host, msg = %output.msg, "debug");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ModuleParams {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_debug_msg() {
        let output = DebugModule
            .execute(&params(json!({"msg": "hi there"})), &ModuleContext::new("h"))
            .await
            .unwrap();
        assert_eq!(output.msg, "hi there");
        assert!(!output.changed);
    }

    #[tokio::test]
    async fn test_debug_var_structured() {
        let output = DebugModule
            .execute(&params(json!({"var": {"a": 1}})), &ModuleContext::new("h"))
            .await
            .unwrap();
        assert!(output.msg.contains("\"a\": 1"));
        assert_eq!(output.data["var"], json!({"a": 1}));
    }

    #[test]
    fn test_debug_rejects_both() {
        assert!(DebugModule
            .validate_params(&params(json!({"msg": "x", "var": "y"})))
            .is_err());
    }
}
