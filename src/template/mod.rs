//! Jinja2-style templating.
//!
//! Templates render against a [`VariableBag`]. The bag is exposed to
//! minijinja as a lazy object: a variable is converted (and decrypted, if it
//! is a vault secret) only when the template actually looks it up.
//!
//! Undefined variables are always an error. A string that is exactly one
//! `{{ expr }}` renders to the native value of `expr`; anything else renders
//! to a string.

pub mod filters;

use indexmap::IndexMap;
use minijinja::value::{Enumerator, Object, ObjectRepr, Value};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use crate::vars::VariableBag;
use crate::vault::{Vault, VaultError, VaultSecret};

/// Errors that can occur during template rendering
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template syntax error in '{template}': {message}")]
    Syntax { template: String, message: String },

    #[error("undefined variable '{name}' in '{template}'")]
    UndefinedVariable { name: String, template: String },

    #[error("type mismatch in '{template}': {message}")]
    TypeMismatch { template: String, message: String },

    #[error("failed to render '{template}': {message}")]
    Render { template: String, message: String },

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

static SINGLE_EXPRESSION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)^\s*\{\{(.*)\}\}\s*$").ok());

const UNDEFINED_SENTINEL: &str = "\u{0}undefined\u{0}";

/// Template engine
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    env: Environment<'static>,
    vault: Option<Arc<Vault>>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine without a vault key
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_keep_trailing_newline(true);
        filters::register_filters(&mut env);

        Self { env, vault: None }
    }

    /// Attach a vault used to decrypt secrets on first reference
    pub fn with_vault(mut self, vault: Arc<Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn vault(&self) -> Option<&Arc<Vault>> {
        self.vault.as_ref()
    }

    /// Check if a string contains template syntax
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render a template string to text
    pub fn render(&self, template: &str, vars: &VariableBag) -> TemplateResult<String> {
        let (scope, lookups) = Scope::new(vars, self.vault.clone());
        let rendered = self
            .env
            .render_str(template, scope)
            .map_err(|e| self.error_for(&lookups, template, e))?;
        lookups.check_vault()?;
        Ok(rendered)
    }

    /// Evaluate a bare expression (e.g. `x > 3 and y is defined`) to its
    /// native value. An expression that evaluates to undefined is an error.
    pub fn evaluate(&self, expression: &str, vars: &VariableBag) -> TemplateResult<serde_json::Value> {
        let expression = strip_braces(expression);
        let wrapper = format!(
            "{{% if ({expr}) is undefined %}}{sentinel}{{% else %}}{{{{ ({expr}) | tojson }}}}{{% endif %}}",
            expr = expression,
            sentinel = UNDEFINED_SENTINEL,
        );

        let (scope, lookups) = Scope::new(vars, self.vault.clone());
        let rendered = self
            .env
            .render_str(&wrapper, scope)
            .map_err(|e| self.error_for(&lookups, expression, e))?;

        // A secret that failed to decrypt also reads as undefined
        lookups.check_vault()?;
        if rendered == UNDEFINED_SENTINEL {
            return Err(TemplateError::UndefinedVariable {
                name: self
                    .first_missing(&lookups)
                    .unwrap_or_else(|| expression.trim().to_string()),
                template: expression.to_string(),
            });
        }

        serde_json::from_str(&rendered).map_err(|e| TemplateError::Render {
            template: expression.to_string(),
            message: e.to_string(),
        })
    }

    /// Evaluate a condition to a boolean using Jinja truthiness
    pub fn evaluate_condition(&self, expression: &str, vars: &VariableBag) -> TemplateResult<bool> {
        self.evaluate(expression, vars).map(|v| is_truthy(&v))
    }

    /// Render every string in a value. A string consisting of a single
    /// `{{ expr }}` keeps the native type of `expr`.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        vars: &VariableBag,
    ) -> TemplateResult<serde_json::Value> {
        match value {
            serde_json::Value::String(s) if Self::is_template(s) => {
                match single_expression(s) {
                    Some(expression) => self.evaluate(expression, vars),
                    None => self.render(s, vars).map(serde_json::Value::String),
                }
            }
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| self.render_value(item, vars))
                .collect::<TemplateResult<Vec<_>>>()
                .map(serde_json::Value::Array),
            serde_json::Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_value(item, vars)?);
                }
                Ok(serde_json::Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Look up one variable, decrypting it if needed
    pub fn resolve_var(&self, name: &str, vars: &VariableBag) -> TemplateResult<serde_json::Value> {
        let value = vars
            .get(name)
            .ok_or_else(|| TemplateError::UndefinedVariable {
                name: name.to_string(),
                template: name.to_string(),
            })?;
        let value = decrypt_all(value, self.vault.as_deref())?;
        serde_json::to_value(&value).map_err(|e| TemplateError::Render {
            template: name.to_string(),
            message: e.to_string(),
        })
    }

    /// First context lookup that missed, ignoring names the environment
    /// resolves as globals (`range`, `dict`, ...). Minijinja asks the
    /// context before its globals, so those misses are not errors.
    fn first_missing(&self, lookups: &Lookups) -> Option<String> {
        lookups
            .missing
            .lock()
            .iter()
            .find(|name| !self.is_global(name))
            .cloned()
    }

    fn is_global(&self, name: &str) -> bool {
        let identifier = name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        identifier
            && self
                .env
                .render_str(&format!("{{{{ {} is defined }}}}", name), ())
                .map(|out| out == "true")
                .unwrap_or(false)
    }

    fn error_for(&self, lookups: &Lookups, template: &str, err: minijinja::Error) -> TemplateError {
        if let Err(vault_error) = lookups.check_vault() {
            return vault_error;
        }

        let template = template.to_string();
        let message = err.to_string();
        match err.kind() {
            ErrorKind::SyntaxError
            | ErrorKind::UnknownFilter
            | ErrorKind::UnknownTest
            | ErrorKind::UnknownFunction => TemplateError::Syntax { template, message },
            ErrorKind::UndefinedError => TemplateError::UndefinedVariable {
                name: self.first_missing(lookups).unwrap_or(message),
                template,
            },
            ErrorKind::InvalidOperation => TemplateError::TypeMismatch { template, message },
            _ => TemplateError::Render { template, message },
        }
    }
}

/// Jinja truthiness of a JSON value
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn strip_braces(expression: &str) -> &str {
    single_expression(expression).unwrap_or(expression)
}

fn single_expression(s: &str) -> Option<&str> {
    let re = SINGLE_EXPRESSION.as_ref()?;
    let inner = re.captures(s)?.get(1)?.as_str();
    if inner.contains("{{") || inner.contains("}}") || inner.contains("{%") {
        return None;
    }
    Some(inner)
}

/// Lookup bookkeeping shared between a render call and its scope
#[derive(Debug, Default)]
struct Lookups {
    missing: Mutex<Vec<String>>,
    failure: Mutex<Option<VaultError>>,
}

impl Lookups {
    /// The first decryption failure seen during the render, if any
    fn check_vault(&self) -> TemplateResult<()> {
        match self.failure.lock().take() {
            Some(e) => Err(TemplateError::Vault(e)),
            None => Ok(()),
        }
    }
}

/// Converts variables to template values on access. Secrets are decrypted
/// at the point a template reads them; failures land in the lookups and the
/// value reads as undefined.
#[derive(Debug, Clone)]
struct Decryptor {
    vault: Option<Arc<Vault>>,
    lookups: Arc<Lookups>,
}

impl Decryptor {
    fn convert(&self, name: &str, value: &serde_yaml::Value) -> Option<Value> {
        if let Some(ciphertext) = encrypted_text(value) {
            let decrypted = self
                .vault
                .as_deref()
                .ok_or(VaultError::MissingKey)
                .and_then(|vault| vault.decrypt(ciphertext));
            return match decrypted {
                Ok(plaintext) => Some(Value::from(plaintext)),
                Err(e) => {
                    tracing::debug!(variable = %name, error = %e, "failed to decrypt variable");
                    self.lookups.failure.lock().get_or_insert(e);
                    None
                }
            };
        }

        Some(match value {
            serde_yaml::Value::Sequence(items) => Value::from_object(LazySequence {
                name: name.to_string(),
                items: items.clone(),
                decryptor: self.clone(),
            }),
            serde_yaml::Value::Mapping(map) => Value::from_object(LazyMapping {
                name: name.to_string(),
                entries: map
                    .iter()
                    .filter_map(|(key, item)| Some((mapping_key(key)?, item.clone())))
                    .collect(),
                decryptor: self.clone(),
            }),
            serde_yaml::Value::Tagged(tagged) => return self.convert(name, &tagged.value),
            scalar => scalar_value(scalar),
        })
    }
}

/// The variable bag as seen by minijinja
#[derive(Debug)]
struct Scope {
    vars: VariableBag,
    decryptor: Decryptor,
}

impl Scope {
    fn new(vars: &VariableBag, vault: Option<Arc<Vault>>) -> (Value, Arc<Lookups>) {
        let lookups = Arc::new(Lookups::default());
        let scope = Scope {
            vars: vars.clone(),
            decryptor: Decryptor {
                vault,
                lookups: Arc::clone(&lookups),
            },
        };
        (Value::from_object(scope), lookups)
    }
}

impl Object for Scope {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let name = key.as_str()?;
        let Some(value) = self.vars.get(name) else {
            self.decryptor.lookups.missing.lock().push(name.to_string());
            return None;
        };
        self.decryptor.convert(name, value)
    }
}

#[derive(Debug)]
struct LazyMapping {
    name: String,
    entries: IndexMap<String, serde_yaml::Value>,
    decryptor: Decryptor,
}

impl Object for LazyMapping {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        let item = self.entries.get(key)?;
        self.decryptor.convert(&format!("{}.{}", self.name, key), item)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.entries.keys().map(|k| Value::from(k.as_str())).collect())
    }
}

#[derive(Debug)]
struct LazySequence {
    name: String,
    items: Vec<serde_yaml::Value>,
    decryptor: Decryptor,
}

impl Object for LazySequence {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let index = key.as_usize()?;
        let item = self.items.get(index)?;
        self.decryptor.convert(&format!("{}[{}]", self.name, index), item)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Seq(self.items.len())
    }
}

/// The ciphertext of a value if it is a vault secret, either tagged
/// `!vault` or a plain string carrying the vault header.
pub fn encrypted_text(value: &serde_yaml::Value) -> Option<&str> {
    match value {
        serde_yaml::Value::Tagged(tagged) if tagged.tag == "vault" => tagged.value.as_str(),
        serde_yaml::Value::String(s) if VaultSecret::is_vault(s) => Some(s),
        _ => None,
    }
}

/// Mapping keys templates can address; other keys are dropped
fn mapping_key(key: &serde_yaml::Value) -> Option<String> {
    match key {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_value(value: &serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Bool(b) => Value::from(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_yaml::Value::String(s) => Value::from(s.as_str()),
        _ => Value::from(()),
    }
}

/// Convert a whole variable, decrypting every secret inside it
fn decrypt_all(value: &serde_yaml::Value, vault: Option<&Vault>) -> Result<Value, VaultError> {
    if let Some(ciphertext) = encrypted_text(value) {
        let vault = vault.ok_or(VaultError::MissingKey)?;
        return vault.decrypt(ciphertext).map(Value::from);
    }

    Ok(match value {
        serde_yaml::Value::Sequence(seq) => Value::from(
            seq.iter()
                .map(|item| decrypt_all(item, vault))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_yaml::Value::Mapping(map) => {
            let mut items = Vec::with_capacity(map.len());
            for (key, item) in map {
                if let Some(key) = mapping_key(key) {
                    items.push((key, decrypt_all(item, vault)?));
                }
            }
            Value::from_iter(items)
        }
        serde_yaml::Value::Tagged(tagged) => decrypt_all(&tagged.value, vault)?,
        scalar => scalar_value(scalar),
    })
}
