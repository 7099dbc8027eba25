//! Per-host task runner
//!
//! One [`HostRunner`] walks a play's task list for one host, strictly in
//! order, then flushes the host's notified handlers. It owns everything
//! host-scoped (variables, handler queue, connection, results), so hosts
//! share nothing but the play definition.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::report::{HostReport, HostState};
use super::task::{TagFilter, TaskResult, TaskStatus};
use crate::connection::{Connection, ConnectionProvider};
use crate::handlers::{Handler, HandlerRegistry};
use crate::inventory::Host;
use crate::modules::set_fact::FACTS_KEY;
use crate::modules::{ModuleContext, ModuleParams, ModuleRegistry, Placement};
use crate::playbook::{LoopSource, Task};
use crate::template::{TemplateEngine, TemplateResult};
use crate::vars::{to_yaml_map, VarPrecedence, VariableBag};

/// Everything a host needs from its play, shared read-only across hosts
pub(crate) struct PlayRun {
    pub name: String,
    pub tasks: Vec<Task>,
    pub handlers: Arc<[Handler]>,
    pub r#become: bool,
    pub check_mode: bool,
    pub fail_fast_loops: bool,
    pub tags: TagFilter,
    pub modules: ModuleRegistry,
    pub templates: TemplateEngine,
    pub connections: Arc<dyn ConnectionProvider>,
    pub cancel: CancellationToken,
}

/// How the host proceeds after a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
    Cancelled,
}

pub(crate) struct HostRunner {
    play: Arc<PlayRun>,
    host: Host,
    vars: VariableBag,
    handlers: HandlerRegistry,
    connection: Option<Arc<dyn Connection>>,
    report: HostReport,
}

impl HostRunner {
    pub fn new(play: Arc<PlayRun>, host: Host, vars: VariableBag) -> Self {
        let handlers = HandlerRegistry::new(Arc::clone(&play.handlers));
        let report = HostReport::new(host.name.clone());
        Self {
            play,
            host,
            vars,
            handlers,
            connection: None,
            report,
        }
    }

    /// Run the task phase, then the handler phase
    #[instrument(skip(self), fields(host = %self.host.name, play = %self.play.name))]
    pub async fn run(mut self) -> HostReport {
        self.report.state = HostState::Running;
        let play = Arc::clone(&self.play);

        let mut flow = Flow::Continue;
        for task in play.tasks.iter() {
            if play.cancel.is_cancelled() {
                flow = Flow::Cancelled;
                break;
            }
            if !play.tags.should_run(&task.tags) {
                debug!(task = %task.label(), "Filtered out by tags");
                continue;
            }

            flow = self.run_task(task, false).await;
            if flow != Flow::Continue {
                break;
            }
        }

        if flow == Flow::Continue {
            flow = self.run_handlers().await;
        } else {
            let dropped = self.handlers.discard(&self.host.name);
            if dropped > 0 {
                debug!(dropped, "Discarding notified handlers");
            }
        }

        self.report.state = match flow {
            Flow::Halt => HostState::Failed,
            Flow::Cancelled => HostState::Cancelled,
            Flow::Continue
                if self
                    .report
                    .results
                    .iter()
                    .all(|r| r.status == TaskStatus::Skipped) =>
            {
                HostState::Skipped
            }
            Flow::Continue => HostState::Completed,
        };

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!(error = %e, "Error closing connection");
            }
        }

        info!(state = %self.report.state, "Host finished");
        self.report
    }

    /// Fire notified handlers until no new notifications arrive
    async fn run_handlers(&mut self) -> Flow {
        loop {
            let fired = self.handlers.flush(&self.host.name);
            if fired.is_empty() {
                return Flow::Continue;
            }

            for handler in &fired {
                if self.play.cancel.is_cancelled() {
                    return Flow::Cancelled;
                }
                info!(handler = %handler.name, "Running handler");
                let flow = self.run_task(&handler.task, true).await;
                if flow != Flow::Continue {
                    return flow;
                }
            }
        }
    }

    async fn run_task(&mut self, task: &Task, is_handler: bool) -> Flow {
        let label = task.label().to_string();
        debug!(task = %label, module = %task.module, "Running task");

        let items = match &task.loop_source {
            None => vec![None],
            Some(source) => match self.loop_items(source) {
                Ok(items) => items.into_iter().map(Some).collect(),
                Err(msg) => {
                    let result = TaskResult::failed(&label, &task.module, msg);
                    return self.finish_task(task, is_handler, vec![result]);
                }
            },
        };

        if items.is_empty() {
            let result = TaskResult::skipped(&label, &task.module, "No items in the list");
            return self.finish_task(task, is_handler, vec![result]);
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if self.play.cancel.is_cancelled() {
                self.finish_task(task, is_handler, results);
                return Flow::Cancelled;
            }

            let vars = match &item {
                Some(value) => self.vars.overlay(
                    VarPrecedence::LoopVars,
                    "loop",
                    IndexMap::from([(task.loop_var.clone(), json_to_yaml(value))]),
                ),
                None => self.vars.clone(),
            };

            let result = self.run_item(task, &label, &vars).await.with_item(item);
            let fatal = result.is_fatal();
            results.push(result);
            if fatal && self.play.fail_fast_loops {
                break;
            }
        }

        self.finish_task(task, is_handler, results)
    }

    /// One invocation of a task: condition, render, invoke, overrides
    async fn run_item(&mut self, task: &Task, label: &str, vars: &VariableBag) -> TaskResult {
        let templates = &self.play.templates;

        for condition in &task.when {
            match templates.evaluate_condition(condition, vars) {
                Ok(true) => {}
                Ok(false) => {
                    return TaskResult::skipped(
                        label,
                        &task.module,
                        format!("Conditional result was false: {}", condition),
                    );
                }
                Err(e) => return TaskResult::failed(label, &task.module, e.to_string()),
            }
        }

        let Some(module) = self.play.modules.get(&task.module) else {
            return TaskResult::failed(
                label,
                &task.module,
                format!("module not found: {}", task.module),
            );
        };

        let params = match self.render_params(&task.params, module.expression_params(), vars) {
            Ok(params) => params,
            Err(e) => return TaskResult::failed(label, &task.module, e.to_string()),
        };

        let mut context = ModuleContext::new(self.host.name.clone())
            .with_check_mode(self.play.check_mode)
            .with_become(self.play.r#become);
        if module.placement() == Placement::Target {
            match self.connection().await {
                Ok(connection) => context = context.with_connection(connection),
                Err(msg) => {
                    self.report.unreachable = true;
                    return TaskResult::unreachable(label, &task.module, msg);
                }
            }
        }

        let mut result = match self
            .play
            .modules
            .invoke_rendered(&task.module, &task.params, &params, &context)
            .await
        {
            Ok(output) => TaskResult::from_output(label, &task.module, &output),
            Err(e) if e.is_connectivity() => {
                self.report.unreachable = true;
                TaskResult::unreachable(label, &task.module, e.to_string())
            }
            Err(e) => TaskResult::failed(label, &task.module, e.to_string()),
        };

        if let Err(e) = self.apply_overrides(task, vars, &mut result) {
            result = TaskResult::failed(label, &task.module, e.to_string());
        }
        if result.status == TaskStatus::Failed && task.ignore_errors {
            result.ignored = true;
        }
        result
    }

    /// Record results, register, notify; decide whether the host goes on
    fn finish_task(&mut self, task: &Task, is_handler: bool, mut results: Vec<TaskResult>) -> Flow {
        for result in &mut results {
            result.handler = is_handler;
            if result.changed {
                for name in &task.notify {
                    match self.handlers.notify(&self.host.name, name) {
                        Ok(queued) => debug!(handler = %name, queued, "Handler notified"),
                        Err(e) => {
                            warn!(task = %result.task, error = %e, "Notification failed");
                            result.set_status(TaskStatus::Failed);
                            result.msg = Some(e.to_string());
                        }
                    }
                }
            }
        }

        let facts: Vec<JsonValue> = results
            .iter()
            .filter(|r| !r.status.is_failure())
            .filter_map(|r| r.result.as_ref()?.get(FACTS_KEY).cloned())
            .collect();
        for facts in facts {
            self.vars = self
                .vars
                .overlay(VarPrecedence::Registered, "set_fact", to_yaml_map(&facts));
        }

        if let Some(name) = &task.register {
            let value = registered_value(task, &results);
            self.vars = self.vars.overlay(
                VarPrecedence::Registered,
                format!("register {}", name),
                IndexMap::from([(name.clone(), json_to_yaml(&value))]),
            );
        }

        let fatal = results.iter().any(TaskResult::is_fatal);
        for result in results {
            log_result(&self.host.name, &result);
            self.report.record(result);
        }

        if fatal {
            Flow::Halt
        } else {
            Flow::Continue
        }
    }

    fn loop_items(&self, source: &LoopSource) -> Result<Vec<JsonValue>, String> {
        let templates = &self.play.templates;
        let value = match source {
            LoopSource::Items(items) => templates
                .render_value(&JsonValue::Array(items.clone()), &self.vars)
                .map_err(|e| e.to_string())?,
            LoopSource::Expression(expr) => templates
                .evaluate(expr, &self.vars)
                .map_err(|e| e.to_string())?,
        };

        match value {
            JsonValue::Array(items) => Ok(items),
            other => Err(format!(
                "loop source must evaluate to a list, got {}",
                json_kind(&other)
            )),
        }
    }

    fn render_params(
        &self,
        params: &ModuleParams,
        expression_params: &[&'static str],
        vars: &VariableBag,
    ) -> TemplateResult<ModuleParams> {
        let templates = &self.play.templates;
        let mut rendered = ModuleParams::with_capacity(params.len());

        for (key, value) in params {
            let value = if expression_params.contains(&key.as_str()) {
                match value {
                    JsonValue::String(expr) => templates.evaluate(expr, vars)?,
                    JsonValue::Array(exprs) => JsonValue::Array(
                        exprs
                            .iter()
                            .map(|e| match e {
                                JsonValue::String(expr) => templates.evaluate(expr, vars),
                                other => Ok(other.clone()),
                            })
                            .collect::<TemplateResult<_>>()?,
                    ),
                    other => other.clone(),
                }
            } else {
                templates.render_value(value, vars)?
            };
            rendered.insert(key.clone(), value);
        }
        Ok(rendered)
    }

    /// Apply `failed_when` and `changed_when`, which see the result under
    /// the `register` name
    fn apply_overrides(
        &self,
        task: &Task,
        vars: &VariableBag,
        result: &mut TaskResult,
    ) -> TemplateResult<()> {
        if task.failed_when.is_empty() && task.changed_when.is_empty() {
            return Ok(());
        }
        if matches!(result.status, TaskStatus::Skipped | TaskStatus::Unreachable) {
            return Ok(());
        }

        let vars = match &task.register {
            Some(name) => vars.overlay(
                VarPrecedence::Registered,
                "result",
                IndexMap::from([(name.clone(), json_to_yaml(&result.registered_value()))]),
            ),
            None => vars.clone(),
        };
        let all = |conditions: &[String]| -> TemplateResult<bool> {
            for condition in conditions {
                if !self.play.templates.evaluate_condition(condition, &vars)? {
                    return Ok(false);
                }
            }
            Ok(true)
        };

        if !task.changed_when.is_empty() && result.status != TaskStatus::Failed {
            let changed = all(&task.changed_when)?;
            result.set_status(if changed {
                TaskStatus::Changed
            } else {
                TaskStatus::Ok
            });
        }

        if !task.failed_when.is_empty() {
            if all(&task.failed_when)? {
                result.set_status(TaskStatus::Failed);
            } else if result.status == TaskStatus::Failed {
                let changed = result
                    .result
                    .as_ref()
                    .and_then(|r| r.get("changed"))
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(false);
                result.set_status(if changed {
                    TaskStatus::Changed
                } else {
                    TaskStatus::Ok
                });
            }
        }
        Ok(())
    }

    /// The host connection, opened on first use
    async fn connection(&mut self) -> Result<Arc<dyn Connection>, String> {
        if let Some(connection) = &self.connection {
            return Ok(Arc::clone(connection));
        }
        let connection = self
            .play
            .connections
            .connect(&self.host)
            .await
            .map_err(|e| e.to_string())?;
        self.connection = Some(Arc::clone(&connection));
        Ok(connection)
    }
}

/// What `register` stores: the single result, or a `results` list for loops
fn registered_value(task: &Task, results: &[TaskResult]) -> JsonValue {
    if task.loop_source.is_none() || (results.len() == 1 && results[0].item.is_none()) {
        return results
            .first()
            .map(TaskResult::registered_value)
            .unwrap_or(JsonValue::Null);
    }

    let values: Vec<JsonValue> = results.iter().map(TaskResult::registered_value).collect();
    serde_json::json!({
        "changed": results.iter().any(|r| r.changed),
        "failed": results.iter().any(TaskResult::is_fatal),
        "skipped": !results.is_empty() && results.iter().all(|r| r.status == TaskStatus::Skipped),
        "msg": "All items completed",
        "results": values,
    })
}

fn log_result(host: &str, result: &TaskResult) {
    let msg = result.msg.as_deref().unwrap_or_default();
    match result.status {
        TaskStatus::Failed if result.ignored => {
            info!(host, task = %result.task, msg, "failed (ignored)")
        }
        TaskStatus::Failed | TaskStatus::Unreachable => {
            warn!(host, task = %result.task, status = %result.status, msg, "Task failed")
        }
        status => info!(host, task = %result.task, %status, "Task finished"),
    }
}

fn json_to_yaml(value: &JsonValue) -> serde_yaml::Value {
    serde_yaml::to_value(value).unwrap_or(serde_yaml::Value::Null)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a bool",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}
