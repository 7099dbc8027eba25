//! Per-task outcomes and tag selection

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

use crate::modules::{ModuleOutput, ModuleStatus};

/// Tag names with special meaning
pub mod special {
    /// Runs unless explicitly skipped
    pub const ALWAYS: &str = "always";
    /// Skipped unless explicitly requested
    pub const NEVER: &str = "never";
}

/// Status of a task execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task completed successfully without changes
    #[default]
    Ok,
    /// Task completed successfully with changes
    Changed,
    Failed,
    /// Task was skipped (condition not met, filtered, or unsupported in check mode)
    Skipped,
    /// Host could not be reached
    Unreachable,
}

impl TaskStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Unreachable)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Changed => "changed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

impl From<ModuleStatus> for TaskStatus {
    fn from(status: ModuleStatus) -> Self {
        match status {
            ModuleStatus::Ok => TaskStatus::Ok,
            ModuleStatus::Changed => TaskStatus::Changed,
            ModuleStatus::Failed => TaskStatus::Failed,
            ModuleStatus::Skipped => TaskStatus::Skipped,
        }
    }
}

/// Result of one task invocation on one host (one per loop item)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task display name
    pub task: String,
    pub module: String,
    pub status: TaskStatus,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Loop item this result belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<JsonValue>,
    /// Register-shaped module output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// The failure was ignored via `ignore_errors`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    /// Produced by a handler rather than a task
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub handler: bool,
}

impl TaskResult {
    fn with_status(task: &str, module: &str, status: TaskStatus) -> Self {
        Self {
            task: task.to_string(),
            module: module.to_string(),
            status,
            changed: status == TaskStatus::Changed,
            ..Default::default()
        }
    }

    pub fn ok(task: &str, module: &str) -> Self {
        Self::with_status(task, module, TaskStatus::Ok)
    }

    pub fn skipped(task: &str, module: &str, msg: impl Into<String>) -> Self {
        Self::with_status(task, module, TaskStatus::Skipped).with_msg(msg)
    }

    pub fn failed(task: &str, module: &str, msg: impl Into<String>) -> Self {
        Self::with_status(task, module, TaskStatus::Failed).with_msg(msg)
    }

    pub fn unreachable(task: &str, module: &str, msg: impl Into<String>) -> Self {
        Self::with_status(task, module, TaskStatus::Unreachable).with_msg(msg)
    }

    /// Build a result from what the module reported
    pub fn from_output(task: &str, module: &str, output: &ModuleOutput) -> Self {
        Self {
            task: task.to_string(),
            module: module.to_string(),
            status: output.status.into(),
            changed: output.changed,
            msg: Some(output.msg.clone()).filter(|m| !m.is_empty()),
            result: Some(output.to_value()),
            ..Default::default()
        }
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_item(mut self, item: Option<JsonValue>) -> Self {
        self.item = item;
        self
    }

    /// Override the status, keeping `changed` consistent with it
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.changed = status == TaskStatus::Changed;
    }

    /// Failed and not ignored
    pub fn is_fatal(&self) -> bool {
        self.status.is_failure() && !self.ignored
    }

    /// The value `register` stores for this result
    pub fn registered_value(&self) -> JsonValue {
        let mut value = match &self.result {
            Some(JsonValue::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };
        value.insert("changed".into(), self.changed.into());
        value.insert("failed".into(), self.status.is_failure().into());
        value.insert("skipped".into(), (self.status == TaskStatus::Skipped).into());
        if self.status == TaskStatus::Unreachable {
            value.insert("unreachable".into(), true.into());
        }
        if let Some(msg) = &self.msg {
            value.entry("msg").or_insert_with(|| msg.clone().into());
        }
        if let Some(item) = &self.item {
            value.insert("item".into(), item.clone());
        }
        JsonValue::Object(value)
    }
}

/// Selects tasks by tag.
///
/// Skip tags win over include tags. `always` runs unless it is skipped
/// explicitly; `never` runs only when requested explicitly.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    include: HashSet<String>,
    skip: HashSet<String>,
}

impl TagFilter {
    pub fn new<I, J>(include: I, skip: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            include: include.into_iter().collect(),
            skip: skip.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.skip.is_empty()
    }

    /// Whether a task with these tags should run
    pub fn should_run(&self, tags: &[String]) -> bool {
        if tags.iter().any(|t| self.skip.contains(t)) {
            return false;
        }

        let has = |name: &str| tags.iter().any(|t| t == name);
        if has(special::NEVER) {
            return tags
                .iter()
                .any(|t| t != special::ALWAYS && self.include.contains(t));
        }
        if has(special::ALWAYS) {
            return true;
        }

        self.include.is_empty()
            || self.include.contains("all")
            || tags.iter().any(|t| self.include.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_runs_everything_but_never() {
        let filter = TagFilter::default();
        assert!(filter.should_run(&[]));
        assert!(filter.should_run(&tags(&["web"])));
        assert!(!filter.should_run(&tags(&["never"])));
    }

    #[test]
    fn test_include_tags() {
        let filter = TagFilter::new(tags(&["web"]), vec![]);
        assert!(filter.should_run(&tags(&["web", "config"])));
        assert!(!filter.should_run(&tags(&["db"])));
        assert!(!filter.should_run(&[]));
    }

    #[test]
    fn test_skip_wins() {
        let filter = TagFilter::new(tags(&["web"]), tags(&["config"]));
        assert!(!filter.should_run(&tags(&["web", "config"])));
    }

    #[test]
    fn test_always_and_never() {
        let filter = TagFilter::new(tags(&["db"]), vec![]);
        assert!(filter.should_run(&tags(&["always"])));
        assert!(!filter.should_run(&tags(&["never", "web"])));
        assert!(filter.should_run(&tags(&["never", "db"])));

        let skip_always = TagFilter::new(vec![], tags(&["always"]));
        assert!(!skip_always.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_registered_value() {
        let output = ModuleOutput::changed("done").with_data("path", "/tmp/x".into());
        let result = TaskResult::from_output("copy", "command", &output)
            .with_item(Some(JsonValue::from("a")));
        let value = result.registered_value();

        assert_eq!(value["changed"], JsonValue::Bool(true));
        assert_eq!(value["failed"], JsonValue::Bool(false));
        assert_eq!(value["path"], JsonValue::from("/tmp/x"));
        assert_eq!(value["item"], JsonValue::from("a"));
    }
}
