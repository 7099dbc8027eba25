//! Set_fact module - Set host variables during a play
//!
//! The module only validates and echoes the facts; the executor reads
//! `data["facts"]` and layers them onto the host's variables for the rest
//! of the play.

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, Placement,
};
use async_trait::async_trait;
use serde_json::Value;

/// Key under which the facts are returned
pub const FACTS_KEY: &str = "facts";

/// Module for setting host facts/variables dynamically
pub struct SetFactModule;

#[async_trait]
impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    fn placement(&self) -> Placement {
        Placement::Controller
    }

    fn supports_check_mode(&self) -> bool {
        true
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if params.keys().all(|k| k == "cacheable") {
            return Err(ModuleError::InvalidParameter(
                "set_fact requires at least one key=value pair to set".to_string(),
            ));
        }
        if let Some(bad) = params.keys().find(|k| !is_identifier(k)) {
            return Err(ModuleError::InvalidParameter(format!(
                "'{}' is not a valid variable name",
                bad
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        params: &ModuleParams,
        _context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let facts: serde_json::Map<String, Value> = params
            .iter()
            .filter(|(key, _)| key.as_str() != "cacheable")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let names: Vec<&str> = facts.keys().map(String::as_str).collect();
        let msg = format!("set {}", names.join(", "));

        Ok(ModuleOutput::ok(msg).with_data(FACTS_KEY, Value::Object(facts)))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
