//! Modules: the named units of work a task invokes.
//!
//! The executor never depends on a concrete module. It looks one up by name
//! in a [`ModuleRegistry`] and hands it fully rendered parameters; the
//! registry refuses parameters that still carry template syntax.

pub mod assert;
pub mod command;
pub mod debug;
pub mod fail;
pub mod set_fact;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::{CommandResult, Connection, ConnectionError};

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("no module named '{0}'")]
    NotFound(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Rendering left `{{` or `{%` behind in this parameter.
    #[error("parameter '{0}' contains unrendered template syntax")]
    UnrenderedParams(String),

    #[error("module '{0}' requires a host connection")]
    NoConnection(String),

    /// The host could not be reached. The executor marks it unreachable.
    #[error("host unreachable: {0}")]
    Connectivity(#[from] ConnectionError),
}

impl ModuleError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    fn wrong_type(key: &str, expected: &str) -> Self {
        Self::InvalidParameter(format!("{} must be {}", key, expected))
    }
}

pub type ModuleResult<T> = Result<T, ModuleError>;

/// Outcome of one module call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Ok,
    Changed,
    Failed,
    /// The module did not run, e.g. it cannot simulate check mode
    Skipped,
}

impl ModuleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Changed => "changed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a module does its work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Pure logic on the control node. No connection is opened.
    Controller,
    /// Work on the managed host through its connection.
    #[default]
    Target,
}

/// What a module reports back.
///
/// `register` stores [`ModuleOutput::to_value`], so the field names here
/// are the names playbooks see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub status: ModuleStatus,
    pub changed: bool,
    pub msg: String,
    /// Module specific results, merged into the registered value
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
}

impl ModuleOutput {
    pub fn new(status: ModuleStatus, msg: impl Into<String>) -> Self {
        Self {
            status,
            changed: status == ModuleStatus::Changed,
            msg: msg.into(),
            data: IndexMap::new(),
            stdout: None,
            stderr: None,
            rc: None,
        }
    }

    pub fn ok(msg: impl Into<String>) -> Self {
        Self::new(ModuleStatus::Ok, msg)
    }

    pub fn changed(msg: impl Into<String>) -> Self {
        Self::new(ModuleStatus::Changed, msg)
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::new(ModuleStatus::Failed, msg)
    }

    pub fn skipped(msg: impl Into<String>) -> Self {
        Self::new(ModuleStatus::Skipped, msg)
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attach a finished command's exit code and output, minus the final
    /// newline.
    pub fn with_command(mut self, result: &CommandResult) -> Self {
        self.rc = Some(result.rc);
        self.stdout = Some(result.stdout.trim_end_matches('\n').to_string());
        self.stderr = Some(result.stderr.trim_end_matches('\n').to_string());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.status == ModuleStatus::Failed
    }

    /// The registered form: status flags, `msg`, command output with
    /// `stdout_lines`, then module data on top.
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::Map::new();
        value.insert("changed".into(), self.changed.into());
        value.insert("failed".into(), self.is_failed().into());
        value.insert(
            "skipped".into(),
            (self.status == ModuleStatus::Skipped).into(),
        );
        value.insert("msg".into(), self.msg.as_str().into());
        if let Some(rc) = self.rc {
            value.insert("rc".into(), rc.into());
        }
        if let Some(stdout) = &self.stdout {
            value.insert("stdout".into(), stdout.as_str().into());
            value.insert("stdout_lines".into(), stdout.lines().collect());
        }
        if let Some(stderr) = &self.stderr {
            value.insert("stderr".into(), stderr.as_str().into());
        }
        value.extend(self.data.iter().map(|(k, v)| (k.clone(), v.clone())));
        Value::Object(value)
    }
}

/// Rendered task parameters, in declaration order
pub type ModuleParams = IndexMap<String, Value>;

/// Everything a module knows about the call besides its parameters
#[derive(Clone, Default)]
pub struct ModuleContext {
    /// Inventory name of the target host
    pub host: String,
    /// Present only for [`Placement::Target`] modules
    pub connection: Option<Arc<dyn Connection>>,
    pub check_mode: bool,
    pub r#become: bool,
}

impl ModuleContext {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_become(mut self, r#become: bool) -> Self {
        self.r#become = r#become;
        self
    }

    pub fn with_connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn require_connection(&self, module: &str) -> ModuleResult<&Arc<dyn Connection>> {
        self.connection
            .as_ref()
            .ok_or_else(|| ModuleError::NoConnection(module.to_string()))
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection = self.connection.as_ref().map(|c| c.identifier());
        f.debug_struct("ModuleContext")
            .field("host", &self.host)
            .field("connection", &connection)
            .field("check_mode", &self.check_mode)
            .field("become", &self.r#become)
            .finish()
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    /// The name tasks use to invoke the module
    fn name(&self) -> &'static str;

    fn placement(&self) -> Placement {
        Placement::Target
    }

    /// Whether `execute` honors `context.check_mode` itself. Modules that
    /// don't are skipped in check mode.
    fn supports_check_mode(&self) -> bool {
        false
    }

    /// Parameters holding bare expressions. The executor evaluates these to
    /// native values instead of rendering them as templates.
    fn expression_params(&self) -> &[&'static str] {
        &[]
    }

    /// Parameters that must be present, checked before `validate_params`
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    fn validate_params(&self, _params: &ModuleParams) -> ModuleResult<()> {
        Ok(())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput>;
}

/// Typed reads of optional parameters. An absent or null parameter is
/// `Ok(None)`; a present one of the wrong shape is an error.
pub trait ParamAccess {
    /// Strings as-is, other scalars in their JSON form
    fn str_param(&self, key: &str) -> ModuleResult<Option<String>>;
    /// Integers, or strings that parse as one
    fn int_param(&self, key: &str) -> ModuleResult<Option<i64>>;
    /// A list, or a single string as a one-element list
    fn list_param(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ParamAccess for ModuleParams {
    fn str_param(&self, key: &str) -> ModuleResult<Option<String>> {
        Ok(match self.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(scalar_text(value)),
        })
    }

    fn int_param(&self, key: &str) -> ModuleResult<Option<i64>> {
        let parsed = match self.get(key) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| ModuleError::wrong_type(key, "an integer"))
    }

    fn list_param(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.iter().map(scalar_text).collect())),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(_) => Err(ModuleError::wrong_type(key, "a list")),
        }
    }
}

/// Name of the first parameter that still holds template syntax.
///
/// A value only counts when it is unchanged from `source`; a variable whose
/// value happens to contain `{{` renders to a different string and passes.
fn unrendered_param<'a>(source: &ModuleParams, params: &'a ModuleParams) -> Option<&'a str> {
    fn has_markers(value: &Value) -> bool {
        match value {
            Value::String(s) => s.contains("{{") || s.contains("{%"),
            Value::Array(items) => items.iter().any(has_markers),
            Value::Object(map) => map.values().any(has_markers),
            _ => false,
        }
    }

    params.iter().find_map(|(key, value)| {
        (has_markers(value) && source.get(key) == Some(value)).then_some(key.as_str())
    })
}

/// Modules by name
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in set: assert, command, debug, fail and set_fact
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(fail::FailModule));
        registry.register(Arc::new(set_fact::SetFactModule));
        registry
    }

    /// Add a module. A module with the same name is replaced.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name(), module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }

    /// Run a module with rendered parameters.
    ///
    /// Parameters are checked in order: template residue, required names,
    /// then the module's own validation. In check mode a module that cannot
    /// simulate itself is reported skipped without running.
    pub async fn invoke(
        &self,
        name: &str,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        self.invoke_rendered(name, params, params, context).await
    }

    /// [`invoke`](Self::invoke) for parameters rendered from `source`.
    /// Only values rendering left untouched are checked for residue.
    pub async fn invoke_rendered(
        &self,
        name: &str,
        source: &ModuleParams,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        if let Some(param) = unrendered_param(source, params) {
            return Err(ModuleError::UnrenderedParams(param.to_string()));
        }
        if let Some(missing) = module
            .required_params()
            .iter()
            .find(|param| !params.contains_key(**param))
        {
            return Err(ModuleError::MissingParameter(missing.to_string()));
        }
        module.validate_params(params)?;

        if context.check_mode && !module.supports_check_mode() {
            return Ok(ModuleOutput::skipped(format!(
                "{} does not support check mode",
                name
            )));
        }

        tracing::debug!(module = %name, host = %context.host, check_mode = context.check_mode, "Invoking module");
        module.execute(params, context).await
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Module for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn required_params(&self) -> &[&'static str] {
            &["msg"]
        }

        async fn execute(
            &self,
            params: &ModuleParams,
            _context: &ModuleContext,
        ) -> ModuleResult<ModuleOutput> {
            Ok(ModuleOutput::changed(params.str_param("msg")?.unwrap_or_default()))
        }
    }

    fn params(value: Value) -> ModuleParams {
        serde_json::from_value(value).unwrap()
    }

    fn echo_registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(Echo));
        registry
    }

    #[test]
    fn test_builtin_names_are_sorted() {
        assert_eq!(
            ModuleRegistry::with_builtins().names(),
            vec!["assert", "command", "debug", "fail", "set_fact"]
        );
        assert!(echo_registry().contains("echo"));
        assert!(!echo_registry().contains("debug"));
    }

    #[tokio::test]
    async fn test_invoke_runs_module() {
        let output = echo_registry()
            .invoke("echo", &params(json!({"msg": "hi"})), &ModuleContext::new("h"))
            .await
            .unwrap();
        assert_eq!(output.status, ModuleStatus::Changed);
        assert_eq!(output.msg, "hi");
    }

    #[tokio::test]
    async fn test_invoke_unknown_module() {
        let err = ModuleRegistry::new()
            .invoke("nope", &ModuleParams::new(), &ModuleContext::new("h"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_invoke_rejects_unrendered() {
        let err = echo_registry()
            .invoke(
                "echo",
                &params(json!({"msg": ["{{ leftover }}"]})),
                &ModuleContext::new("h"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::UnrenderedParams(p) if p == "msg"));
    }

    #[tokio::test]
    async fn test_rendered_braces_from_variables_pass() {
        let registry = echo_registry();
        let source = params(json!({"msg": "{{ banner }}"}));

        // `banner` held a literal "{{ name }}"
        let output = registry
            .invoke_rendered(
                "echo",
                &source,
                &params(json!({"msg": "{{ name }}"})),
                &ModuleContext::new("h"),
            )
            .await
            .unwrap();
        assert_eq!(output.msg, "{{ name }}");

        let err = registry
            .invoke_rendered("echo", &source, &source, &ModuleContext::new("h"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::UnrenderedParams(p) if p == "msg"));
    }

    #[tokio::test]
    async fn test_invoke_missing_param() {
        let err = echo_registry()
            .invoke("echo", &ModuleParams::new(), &ModuleContext::new("h"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::MissingParameter(p) if p == "msg"));
    }

    #[tokio::test]
    async fn test_check_mode_skips_unsupported() {
        let output = echo_registry()
            .invoke(
                "echo",
                &params(json!({"msg": "hi"})),
                &ModuleContext::new("h").with_check_mode(true),
            )
            .await
            .unwrap();
        assert_eq!(output.status, ModuleStatus::Skipped);
        assert!(!output.changed);
    }

    #[test]
    fn test_registered_value() {
        let value = ModuleOutput::changed("done")
            .with_command(&CommandResult::exited(0, "a\nb\n", ""))
            .with_data("extra", json!(1))
            .to_value();

        assert_eq!(value["changed"], json!(true));
        assert_eq!(value["failed"], json!(false));
        assert_eq!(value["stdout"], json!("a\nb"));
        assert_eq!(value["stdout_lines"], json!(["a", "b"]));
        assert_eq!(value["rc"], json!(0));
        assert_eq!(value["extra"], json!(1));
    }

    #[test]
    fn test_param_access() {
        let p = params(json!({
            "name": "web",
            "port": 8080,
            "retries": " 3 ",
            "one": "solo",
            "many": ["a", 2],
            "nothing": null,
            "map": {"k": "v"},
        }));

        assert_eq!(p.str_param("name").unwrap().as_deref(), Some("web"));
        assert_eq!(p.str_param("port").unwrap().as_deref(), Some("8080"));
        assert_eq!(p.str_param("nothing").unwrap(), None);
        assert_eq!(p.int_param("port").unwrap(), Some(8080));
        assert_eq!(p.int_param("retries").unwrap(), Some(3));
        assert!(p.int_param("name").is_err());
        assert_eq!(p.list_param("one").unwrap(), Some(vec!["solo".to_string()]));
        assert_eq!(
            p.list_param("many").unwrap(),
            Some(vec!["a".to_string(), "2".to_string()])
        );
        assert!(p.list_param("map").is_err());
        assert_eq!(p.list_param("absent").unwrap(), None);
    }
}
