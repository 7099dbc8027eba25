//! Command module - Execute commands on the host
//!
//! The command line comes from the free-form `_raw_params`, from `cmd`, or
//! from an `argv` list (each element quoted). It runs through the host's
//! connection; a non-zero exit code fails the task.

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamAccess,
};
use crate::connection::ExecuteOptions;
use crate::template::filters::shell_quote;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Module for executing commands through the host connection
pub struct CommandModule;

impl CommandModule {
    fn command_line(params: &ModuleParams) -> ModuleResult<String> {
        if let Some(argv) = params.list_param("argv")? {
            if argv.is_empty() {
                return Err(ModuleError::InvalidParameter(
                    "argv cannot be empty".to_string(),
                ));
            }
            return Ok(argv
                .iter()
                .map(|arg| shell_quote(arg))
                .collect::<Vec<_>>()
                .join(" "));
        }

        let cmd = match params.str_param("_raw_params")? {
            Some(raw) => raw,
            None => params.str_param("cmd")?.ok_or_else(|| {
                ModuleError::MissingParameter("one of '_raw_params', 'cmd' or 'argv'".to_string())
            })?,
        };

        if cmd.trim().is_empty() {
            return Err(ModuleError::InvalidParameter(
                "command cannot be empty".to_string(),
            ));
        }
        Ok(cmd)
    }

    fn options(params: &ModuleParams) -> ModuleResult<ExecuteOptions> {
        let mut options = ExecuteOptions::default();
        if let Some(chdir) = params.str_param("chdir")? {
            options = options.chdir(chdir);
        }
        if let Some(serde_json::Value::Object(env)) = params.get("env") {
            for (key, value) in env {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                options = options.var(key, value);
            }
        }
        if let Some(timeout) = params.int_param("timeout")? {
            let timeout = u64::try_from(timeout).map_err(|_| {
                ModuleError::InvalidParameter("timeout must be positive".to_string())
            })?;
            options = options.timeout(Duration::from_secs(timeout));
        }
        Ok(options)
    }
}

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    fn supports_check_mode(&self) -> bool {
        true
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        Self::command_line(params).map(|_| ())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let cmd = Self::command_line(params)?;
        let connection = context.require_connection(self.name())?;

        if let Some(creates) = params.str_param("creates")? {
            if connection.path_exists(Path::new(&creates)).await? {
                return Ok(ModuleOutput::ok(format!("skipped, '{}' exists", creates)));
            }
        }
        if let Some(removes) = params.str_param("removes")? {
            if !connection.path_exists(Path::new(&removes)).await? {
                return Ok(ModuleOutput::ok(format!(
                    "skipped, '{}' does not exist",
                    removes
                )));
            }
        }

        if context.check_mode {
            return Ok(ModuleOutput::skipped(format!("would run: {}", cmd)));
        }

        let result = connection
            .execute(&cmd, Some(Self::options(params)?))
            .await?;

        let output = if result.succeeded() {
            ModuleOutput::changed(format!("command '{}' executed", cmd))
        } else {
            ModuleOutput::failed(format!(
                "command '{}' exited with code {}: {}",
                cmd,
                result.rc,
                result.detail()
            ))
        };

        Ok(output.with_command(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use serde_json::json;
    use std::sync::Arc;

    fn params(value: serde_json::Value) -> ModuleParams {
        serde_json::from_value(value).unwrap()
    }

    fn local() -> ModuleContext {
        ModuleContext::new("localhost").with_connection(Arc::new(LocalConnection::new()))
    }

    #[test]
    fn test_command_line_sources() {
        assert_eq!(
            CommandModule::command_line(&params(json!({"_raw_params": "echo hi"}))).unwrap(),
            "echo hi"
        );
        assert_eq!(
            CommandModule::command_line(&params(json!({"argv": ["echo", "a b"]}))).unwrap(),
            "echo 'a b'"
        );
        assert!(CommandModule::command_line(&params(json!({}))).is_err());
    }

    #[tokio::test]
    async fn test_command_runs() {
        let output = CommandModule
            .execute(&params(json!({"cmd": "echo converge"})), &local())
            .await
            .unwrap();
        assert!(output.changed);
        assert_eq!(output.stdout.as_deref(), Some("converge"));
        assert_eq!(output.rc, Some(0));
    }

    #[tokio::test]
    async fn test_command_nonzero_fails() {
        let output = CommandModule
            .execute(&params(json!({"cmd": "exit 3"})), &local())
            .await
            .unwrap();
        assert!(output.is_failed());
        assert_eq!(output.rc, Some(3));
    }

    #[tokio::test]
    async fn test_command_creates_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let output = CommandModule
            .execute(
                &params(json!({
                    "cmd": "exit 1",
                    "creates": dir.path().to_string_lossy(),
                })),
                &local(),
            )
            .await
            .unwrap();
        assert!(!output.changed);
        assert!(!output.is_failed());
    }

    #[tokio::test]
    async fn test_command_check_mode() {
        let output = CommandModule
            .execute(
                &params(json!({"cmd": "touch /nonexistent/file"})),
                &local().with_check_mode(true),
            )
            .await
            .unwrap();
        assert_eq!(output.status, crate::modules::ModuleStatus::Skipped);
    }

    #[tokio::test]
    async fn test_command_without_connection() {
        let err = CommandModule
            .execute(&params(json!({"cmd": "true"})), &ModuleContext::new("h"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::NoConnection(_)));
    }
}
