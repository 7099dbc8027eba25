//! Playbook definitions and parsing.
//!
//! A playbook is a YAML list of plays. Tasks name their module either with
//! an explicit `module:`/`params:` pair or with the free-form shorthand
//! where the module name is the one key that is not a task keyword:
//!
//! ```yaml
//! - name: Configure web tier
//!   hosts: webservers
//!   tasks:
//!     - name: Render config
//!       command: "render --port {{ http_port }}"
//!       notify: restart web
//!   handlers:
//!     - name: restart web
//!       command: systemctl restart web
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::modules::ModuleParams;
use crate::roles::Role;

/// Errors raised while loading or validating playbooks
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid playbook YAML in '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid task '{task}': {message}")]
    InvalidTask { task: String, message: String },

    #[error("task '{task}' notifies unknown handler '{handler}'")]
    UnknownHandler { task: String, handler: String },

    #[error("role '{name}' not found (searched: {searched})")]
    RoleNotFound { name: String, searched: String },

    #[error("play '{0}' is invalid: {1}")]
    InvalidPlay(String, String),
}

/// Result type for playbook operations
pub type PlaybookResult<T> = Result<T, PlaybookError>;

/// Modules whose free-form string is passed through whole
const RAW_PARAM_MODULES: &[&str] = &["command", "shell"];

/// Where loop items come from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LoopSource {
    /// A literal list
    Items(Vec<serde_json::Value>),
    /// A template or bare expression evaluating to a list
    Expression(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoopControl {
    loop_var: Option<String>,
}

/// The serialized shape of a task, before the module key is resolved
#[derive(Debug, Deserialize)]
struct RawTask {
    name: Option<String>,
    module: Option<String>,
    params: Option<serde_yaml::Value>,
    args: Option<serde_yaml::Mapping>,
    #[serde(default, deserialize_with = "string_list")]
    when: Vec<String>,
    #[serde(rename = "loop")]
    loop_source: Option<LoopSource>,
    with_items: Option<LoopSource>,
    loop_control: Option<LoopControl>,
    loop_var: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    notify: Vec<String>,
    register: Option<String>,
    #[serde(default)]
    ignore_errors: bool,
    #[serde(default, deserialize_with = "string_list")]
    changed_when: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    failed_when: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    tags: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    listen: Vec<String>,
    #[serde(flatten)]
    rest: IndexMap<String, serde_yaml::Value>,
}

/// A task to execute.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    pub name: String,
    /// Module to invoke
    pub module: String,
    /// Module parameters, possibly containing template expressions
    pub params: ModuleParams,
    /// Conditions, all of which must hold
    pub when: Vec<String>,
    pub loop_source: Option<LoopSource>,
    /// Variable the current loop item is bound to
    pub loop_var: String,
    /// Handlers to notify on change
    pub notify: Vec<String>,
    /// Variable to store the result in
    pub register: Option<String>,
    pub ignore_errors: bool,
    pub changed_when: Vec<String>,
    pub failed_when: Vec<String>,
    pub tags: Vec<String>,
}

impl Task {
    /// Creates a new task.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            params: ModuleParams::new(),
            when: Vec::new(),
            loop_source: None,
            loop_var: "item".to_string(),
            notify: Vec::new(),
            register: None,
            ignore_errors: false,
            changed_when: Vec::new(),
            failed_when: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_when(mut self, condition: impl Into<String>) -> Self {
        self.when.push(condition.into());
        self
    }

    pub fn with_loop(mut self, source: LoopSource) -> Self {
        self.loop_source = Some(source);
        self
    }

    pub fn with_notify(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }

    pub fn with_register(mut self, var: impl Into<String>) -> Self {
        self.register = Some(var.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Display label: the name, or the module when unnamed
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.module
        } else {
            &self.name
        }
    }
}

impl TryFrom<RawTask> for Task {
    type Error = PlaybookError;

    fn try_from(raw: RawTask) -> PlaybookResult<Self> {
        let label = raw.name.clone().unwrap_or_default();
        let invalid = |message: String| PlaybookError::InvalidTask {
            task: label.clone(),
            message,
        };

        let (module, value) = match raw.module {
            Some(module) => {
                if !raw.rest.is_empty() {
                    let keys: Vec<&str> = raw.rest.keys().map(String::as_str).collect();
                    return Err(invalid(format!(
                        "unexpected keys alongside 'module': {}",
                        keys.join(", ")
                    )));
                }
                (module, raw.params.unwrap_or(serde_yaml::Value::Null))
            }
            None => {
                let mut candidates = raw.rest.into_iter();
                let (module, value) = candidates
                    .next()
                    .ok_or_else(|| invalid("no module specified".to_string()))?;
                if let Some((other, _)) = candidates.next() {
                    return Err(invalid(format!(
                        "conflicting module keys '{}' and '{}'",
                        module, other
                    )));
                }
                (module, value)
            }
        };

        let mut params = module_params(&module, value).map_err(invalid)?;
        if let Some(args) = raw.args {
            for (key, value) in args {
                let key = key
                    .as_str()
                    .ok_or_else(|| invalid("'args' keys must be strings".to_string()))?
                    .to_string();
                let value = serde_json::to_value(&value).map_err(|e| invalid(e.to_string()))?;
                params.entry(key).or_insert(value);
            }
        }

        if !raw.listen.is_empty() {
            return Err(invalid("'listen' is only valid on handlers".to_string()));
        }

        if raw.loop_source.is_some() && raw.with_items.is_some() {
            return Err(invalid("'loop' and 'with_items' are mutually exclusive".to_string()));
        }

        let loop_var = raw
            .loop_control
            .and_then(|c| c.loop_var)
            .or(raw.loop_var)
            .unwrap_or_else(|| "item".to_string());

        Ok(Task {
            name: raw.name.unwrap_or_default(),
            module,
            params,
            when: raw.when,
            loop_source: raw.loop_source.or(raw.with_items),
            loop_var,
            notify: raw.notify,
            register: raw.register,
            ignore_errors: raw.ignore_errors,
            changed_when: raw.changed_when,
            failed_when: raw.failed_when,
            tags: raw.tags,
        })
    }
}

/// Turn the value under the module key into parameters
fn module_params(module: &str, value: serde_yaml::Value) -> Result<ModuleParams, String> {
    match value {
        serde_yaml::Value::Null => Ok(ModuleParams::new()),
        serde_yaml::Value::Mapping(_) => {
            serde_json::from_value(serde_json::to_value(&value).map_err(|e| e.to_string())?)
                .map_err(|e: serde_json::Error| e.to_string())
        }
        serde_yaml::Value::String(s) => Ok(free_form_params(module, &s)),
        other => Err(format!(
            "parameters of '{}' must be a mapping or a string, got {:?}",
            module, other
        )),
    }
}

/// `debug: msg="hi there"` style parameters. Strings that are not all
/// `key=value` pairs are passed as `_raw_params`.
fn free_form_params(module: &str, text: &str) -> ModuleParams {
    let mut params = ModuleParams::new();

    if !RAW_PARAM_MODULES.contains(&module) {
        let pairs = crate::vars::split_pairs(text);
        let parsed: Option<Vec<(&str, &str)>> = pairs
            .iter()
            .map(|pair| pair.split_once('=').filter(|(k, _)| is_param_name(k)))
            .collect();
        if let Some(parsed) = parsed.filter(|p| !p.is_empty()) {
            for (key, value) in parsed {
                let value = crate::inventory::parse_scalar(value);
                params.insert(
                    key.to_string(),
                    serde_json::to_value(&value).unwrap_or(serde_json::Value::Null),
                );
            }
            return params;
        }
    }

    params.insert("_raw_params".to_string(), text.into());
    params
}

fn is_param_name(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn scalar_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// A string or list of strings (`when: x` and `when: [x, y]`)
fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_yaml::Value::Null) => Vec::new(),
        Some(serde_yaml::Value::Sequence(items)) => items.iter().map(scalar_string).collect(),
        Some(other) => vec![scalar_string(&other)],
    })
}

/// A handler (task triggered by notifications).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Handler {
    /// Handler name (must match notify in tasks)
    pub name: String,
    /// Additional notification topics this handler answers to
    pub listen: Vec<String>,
    pub task: Task,
}

impl Handler {
    pub fn new(task: Task) -> Self {
        Self {
            name: task.name.clone(),
            listen: Vec::new(),
            task,
        }
    }

    pub fn with_listen(mut self, topic: impl Into<String>) -> Self {
        self.listen.push(topic.into());
        self
    }

    /// Whether a notification for `name` triggers this handler
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.listen.iter().any(|topic| topic == name)
    }
}

impl TryFrom<RawTask> for Handler {
    type Error = PlaybookError;

    fn try_from(mut raw: RawTask) -> PlaybookResult<Self> {
        let listen = std::mem::take(&mut raw.listen);
        let task = Task::try_from(raw)?;
        if task.name.is_empty() && listen.is_empty() {
            return Err(PlaybookError::InvalidTask {
                task: task.module.clone(),
                message: "handlers need a name or a listen topic".to_string(),
            });
        }
        Ok(Self {
            name: task.name.clone(),
            listen,
            task,
        })
    }
}

/// Reference to a role with optional parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RoleRef {
    Simple(String),
    Full {
        role: String,
        #[serde(default, deserialize_with = "string_list")]
        tags: Vec<String>,
        #[serde(default, flatten)]
        vars: IndexMap<String, serde_yaml::Value>,
    },
}

impl RoleRef {
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(name) => name,
            Self::Full { role, .. } => role,
        }
    }
}

/// A play within a playbook.
///
/// A play maps a selection of hosts to tasks to be executed on those hosts.
#[derive(Debug, Clone, Deserialize)]
pub struct Play {
    #[serde(default)]
    pub name: String,

    /// Host pattern to match against inventory
    pub hosts: String,

    /// Privilege escalation flag, forwarded to modules
    #[serde(default, rename = "become")]
    pub r#become: bool,

    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub roles: Vec<RoleRef>,

    #[serde(default)]
    pub tasks: Vec<Task>,

    #[serde(default)]
    pub handlers: Vec<Handler>,

    /// Tags applied to every task of the play
    #[serde(default, deserialize_with = "string_list")]
    pub tags: Vec<String>,

    /// Roles loaded from disk, in `roles` order
    #[serde(skip)]
    pub loaded_roles: Vec<Role>,
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            r#become: false,
            vars: IndexMap::new(),
            roles: Vec::new(),
            tasks: Vec::new(),
            handlers: Vec::new(),
            tags: Vec::new(),
            loaded_roles: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Tasks in execution order: role tasks first, then the play's own,
    /// each carrying the play's tags
    pub fn all_tasks(&self) -> Vec<Task> {
        self.loaded_roles
            .iter()
            .flat_map(|role| role.tasks.iter())
            .chain(self.tasks.iter())
            .map(|task| {
                let mut task = task.clone();
                for tag in &self.tags {
                    if !task.tags.contains(tag) {
                        task.tags.push(tag.clone());
                    }
                }
                task
            })
            .collect()
    }

    /// Handlers in declaration order: role handlers first, then the play's
    pub fn all_handlers(&self) -> Vec<Handler> {
        self.loaded_roles
            .iter()
            .flat_map(|role| role.handlers.iter())
            .chain(self.handlers.iter())
            .cloned()
            .collect()
    }

    /// Check that every notify target exists
    pub fn validate(&self) -> PlaybookResult<()> {
        if self.hosts.trim().is_empty() {
            return Err(PlaybookError::InvalidPlay(
                self.name.clone(),
                "'hosts' must not be empty".to_string(),
            ));
        }

        let handlers = self.all_handlers();
        let known: HashSet<&str> = handlers
            .iter()
            .flat_map(|h| std::iter::once(h.name.as_str()).chain(h.listen.iter().map(String::as_str)))
            .collect();

        let tasks = self.all_tasks();
        let notifying = tasks.iter().chain(handlers.iter().map(|h| &h.task));
        for task in notifying {
            for name in &task.notify {
                if !known.contains(name.as_str()) {
                    return Err(PlaybookError::UnknownHandler {
                        task: task.label().to_string(),
                        handler: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A playbook containing one or more plays.
#[derive(Debug, Clone)]
pub struct Playbook {
    pub plays: Vec<Play>,
    /// Path to the playbook file (set during loading)
    pub source_path: Option<PathBuf>,
}

impl Playbook {
    /// Parse a playbook from a YAML string. Roles are not loaded.
    pub fn from_yaml(yaml: &str) -> PlaybookResult<Self> {
        let plays: Option<Vec<Play>> =
            serde_yaml::from_str(yaml).map_err(|source| PlaybookError::Yaml {
                path: "<string>".to_string(),
                source,
            })?;
        Ok(Self {
            plays: plays.unwrap_or_default(),
            source_path: None,
        })
    }

    /// Load a playbook file, resolve its roles and validate it.
    ///
    /// Roles are searched in `roles/` next to the playbook, then in each
    /// directory of `roles_path`.
    pub fn load(path: impl AsRef<Path>, roles_path: &[PathBuf]) -> PlaybookResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PlaybookError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let plays: Option<Vec<Play>> =
            serde_yaml::from_str(&content).map_err(|source| PlaybookError::Yaml {
                path: path.display().to_string(),
                source,
            })?;

        let mut search = Vec::with_capacity(roles_path.len() + 1);
        if let Some(dir) = path.parent() {
            search.push(dir.join("roles"));
        }
        search.extend(roles_path.iter().cloned());

        let mut playbook = Self {
            plays: plays.unwrap_or_default(),
            source_path: Some(path.to_path_buf()),
        };
        playbook.resolve_roles(&search)?;
        playbook.validate()?;
        Ok(playbook)
    }

    /// Load the roles every play references
    pub fn resolve_roles(&mut self, search: &[PathBuf]) -> PlaybookResult<()> {
        for play in &mut self.plays {
            play.loaded_roles = play
                .roles
                .iter()
                .map(|role_ref| Role::load(role_ref, search))
                .collect::<PlaybookResult<_>>()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> PlaybookResult<()> {
        self.plays.iter().try_for_each(Play::validate)
    }

    pub fn task_count(&self) -> usize {
        self.plays.iter().map(|p| p.all_tasks().len()).sum()
    }
}
