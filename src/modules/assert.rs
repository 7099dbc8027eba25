//! Assert module - Fail task if conditions are not met
//!
//! `that` holds one expression or a list of them. The executor evaluates
//! them before invocation, so by the time the module runs each entry is
//! the expression's value and only its truthiness is checked here.

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamAccess,
    Placement,
};
use crate::template::is_truthy;
use async_trait::async_trait;
use serde_json::Value;

/// Module for asserting conditions are true
pub struct AssertModule;

#[async_trait]
impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    fn placement(&self) -> Placement {
        Placement::Controller
    }

    fn supports_check_mode(&self) -> bool {
        true
    }

    fn expression_params(&self) -> &[&'static str] {
        &["that"]
    }

    fn required_params(&self) -> &[&'static str] {
        &["that"]
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        _context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let results: Vec<&Value> = match params.get("that") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(value) => vec![value],
            None => return Err(ModuleError::MissingParameter("that".to_string())),
        };

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, value)| !is_truthy(value))
            .map(|(index, _)| index + 1)
            .collect();

        if failed.is_empty() {
            let msg = params
                .str_param("success_msg")?
                .unwrap_or_else(|| "All assertions passed".to_string());
            return Ok(ModuleOutput::ok(msg));
        }

        let msg = match params.str_param("fail_msg")? {
            Some(msg) => msg,
            None => params.str_param("msg")?.unwrap_or_else(|| {
                let positions: Vec<String> = failed.iter().map(usize::to_string).collect();
                format!("Assertion failed (condition {})", positions.join(", "))
            }),
        };

        Ok(ModuleOutput::failed(msg).with_data("failed_conditions", serde_json::json!(failed)))
    }
}
