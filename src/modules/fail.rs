//! Fail module - Fail the task with a message

use super::{
    Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamAccess, Placement,
};
use async_trait::async_trait;

/// Module that always fails
pub struct FailModule;

#[async_trait]
impl Module for FailModule {
    fn name(&self) -> &'static str {
        "fail"
    }

    fn placement(&self) -> Placement {
        Placement::Controller
    }

    fn supports_check_mode(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        _context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let msg = params
            .str_param("msg")?
            .unwrap_or_else(|| "Failed as requested from task".to_string());
        Ok(ModuleOutput::failed(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_default_message() {
        let output = FailModule
            .execute(&ModuleParams::new(), &ModuleContext::new("h"))
            .await
            .unwrap();
        assert!(output.is_failed());
        assert_eq!(output.msg, "Failed as requested from task");
    }
}
