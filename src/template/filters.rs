//! Filters for the template engine.
//!
//! These replace several minijinja builtins with versions that refuse
//! operands of the wrong kind instead of coercing them, so that
//! `{{ 5 | upper }}` is an error rather than `"5"`.
//!
//! # Available Filters
//!
//! - String: `upper`, `lower`, `capitalize`, `title`, `trim`, `replace`,
//!   `split`, `quote`
//! - Regex: `regex_replace`, `regex_search`
//! - Encoding: `b64encode`, `b64decode`, `to_json`, `to_yaml`
//! - Conversion: `int`, `float`, `bool`
//! - Checks: `mandatory`

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, Value};
use regex::Regex;

/// Register all filters with the given environment.
pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("upper", |v: Value| map_str(v, "upper", |s| s.to_uppercase()));
    env.add_filter("lower", |v: Value| map_str(v, "lower", |s| s.to_lowercase()));
    env.add_filter("capitalize", |v: Value| map_str(v, "capitalize", capitalize));
    env.add_filter("title", |v: Value| map_str(v, "title", title));
    env.add_filter("trim", |v: Value| map_str(v, "trim", |s| s.trim().to_string()));
    env.add_filter("replace", replace);
    env.add_filter("split", split);
    env.add_filter("quote", |v: Value| map_str(v, "quote", shell_quote));
    env.add_filter("regex_replace", regex_replace);
    env.add_filter("regex_search", regex_search);
    env.add_filter("b64encode", |v: Value| map_str(v, "b64encode", |s| BASE64.encode(s)));
    env.add_filter("b64decode", b64decode);
    env.add_filter("to_json", to_json);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("int", to_int);
    env.add_filter("float", to_float);
    env.add_filter("bool", to_bool);
    env.add_filter("mandatory", mandatory);
}

fn kind_name(value: &Value) -> &'static str {
    match value.kind() {
        ValueKind::Undefined => "undefined",
        ValueKind::None => "none",
        ValueKind::Bool => "bool",
        ValueKind::Number => "number",
        ValueKind::String => "string",
        ValueKind::Bytes => "bytes",
        ValueKind::Seq => "sequence",
        ValueKind::Map => "mapping",
        _ => "object",
    }
}

fn type_error(filter: &str, expected: &str, value: &Value) -> Error {
    Error::new(
        ErrorKind::InvalidOperation,
        format!(
            "filter '{}' expects {}, got {}",
            filter,
            expected,
            kind_name(value)
        ),
    )
}

/// The string operand of a filter, rejecting anything else
fn require_str<'a>(value: &'a Value, filter: &str) -> Result<&'a str, Error> {
    if value.is_undefined() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            format!("filter '{}' applied to an undefined value", filter),
        ));
    }
    value
        .as_str()
        .ok_or_else(|| type_error(filter, "a string", value))
}

fn map_str(value: Value, filter: &str, f: impl Fn(&str) -> String) -> Result<Value, Error> {
    let s = require_str(&value, filter)?;
    Ok(Value::from(f(s)))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
    }
}

fn title(s: &str) -> String {
    s.split(' ').map(capitalize).collect::<Vec<_>>().join(" ")
}

pub(crate) fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

fn replace(value: Value, from: Value, to: Value) -> Result<Value, Error> {
    let s = require_str(&value, "replace")?;
    let from = require_str(&from, "replace")?;
    let to = require_str(&to, "replace")?;
    Ok(Value::from(s.replace(from, to)))
}

fn split(value: Value, sep: Option<Value>) -> Result<Value, Error> {
    let s = require_str(&value, "split")?;
    let parts: Vec<Value> = match &sep {
        Some(sep) => {
            let sep = require_str(sep, "split")?;
            s.split(sep).map(Value::from).collect()
        }
        None => s.split_whitespace().map(Value::from).collect(),
    };
    Ok(Value::from(parts))
}

fn compile(pattern: &Value, filter: &str) -> Result<Regex, Error> {
    let pattern = require_str(pattern, filter)?;
    Regex::new(pattern).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid regex '{}': {}", pattern, e),
        )
    })
}

fn regex_replace(value: Value, pattern: Value, replacement: Option<Value>) -> Result<Value, Error> {
    let s = require_str(&value, "regex_replace")?;
    let re = compile(&pattern, "regex_replace")?;
    let replacement = match &replacement {
        Some(r) => require_str(r, "regex_replace")?,
        None => "",
    };
    // Ansible-style backreferences: \1 -> ${1}
    let replacement = Regex::new(r"\\(\d+)")
        .map(|backref| backref.replace_all(replacement, "$${$1}").into_owned())
        .unwrap_or_else(|_| replacement.to_string());
    Ok(Value::from(re.replace_all(s, replacement.as_str()).into_owned()))
}

/// First capture group if the pattern has one, else the whole match.
/// No match yields none.
fn regex_search(value: Value, pattern: Value) -> Result<Value, Error> {
    let s = require_str(&value, "regex_search")?;
    let re = compile(&pattern, "regex_search")?;
    Ok(match re.captures(s) {
        Some(caps) => caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| Value::from(m.as_str()))
            .unwrap_or(Value::from(())),
        None => Value::from(()),
    })
}

fn b64decode(value: Value) -> Result<Value, Error> {
    let s = require_str(&value, "b64decode")?;
    let bytes = BASE64.decode(s.trim()).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("invalid base64: {}", e))
    })?;
    String::from_utf8(bytes).map(Value::from).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            "decoded base64 is not valid UTF-8",
        )
    })
}

fn serialize_error(e: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::InvalidOperation, e.to_string())
}

fn to_json(value: Value) -> Result<Value, Error> {
    if value.is_undefined() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            "filter 'to_json' applied to an undefined value",
        ));
    }
    serde_json::to_string(&value)
        .map(Value::from)
        .map_err(serialize_error)
}

fn to_yaml(value: Value) -> Result<Value, Error> {
    if value.is_undefined() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            "filter 'to_yaml' applied to an undefined value",
        ));
    }
    serde_yaml::to_string(&value)
        .map(|s| Value::from(s.trim_end().to_string()))
        .map_err(serialize_error)
}

fn to_int(value: Value) -> Result<Value, Error> {
    match value.kind() {
        ValueKind::Number => {
            if let Ok(i) = i64::try_from(value.clone()) {
                Ok(Value::from(i))
            } else {
                let f = f64::try_from(value.clone()).map_err(serialize_error)?;
                Ok(Value::from(f.trunc() as i64))
            }
        }
        ValueKind::Bool => Ok(Value::from(i64::from(value.is_true()))),
        ValueKind::String => {
            let s = value.as_str().unwrap_or_default().trim();
            s.parse::<i64>()
                .map(Value::from)
                .or_else(|_| s.parse::<f64>().map(|f| Value::from(f.trunc() as i64)))
                .map_err(|_| type_error("int", "a numeric string", &value))
        }
        _ => Err(type_error("int", "a number or numeric string", &value)),
    }
}

fn to_float(value: Value) -> Result<Value, Error> {
    match value.kind() {
        ValueKind::Number => f64::try_from(value).map(Value::from).map_err(serialize_error),
        ValueKind::String => value
            .as_str()
            .unwrap_or_default()
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| type_error("float", "a numeric string", &value)),
        _ => Err(type_error("float", "a number or numeric string", &value)),
    }
}

fn to_bool(value: Value) -> Result<Value, Error> {
    match value.kind() {
        ValueKind::Bool => Ok(value),
        ValueKind::Number => Ok(Value::from(value.is_true())),
        ValueKind::String => {
            match value.as_str().unwrap_or_default().trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" | "y" => Ok(Value::from(true)),
                "false" | "no" | "off" | "0" | "n" | "" => Ok(Value::from(false)),
                _ => Err(type_error("bool", "a boolean-like string", &value)),
            }
        }
        ValueKind::None => Ok(Value::from(false)),
        _ => Err(type_error("bool", "a scalar", &value)),
    }
}

fn mandatory(value: Value, message: Option<Value>) -> Result<Value, Error> {
    if value.is_undefined() {
        let message = message
            .as_ref()
            .and_then(|m| m.as_str())
            .unwrap_or("mandatory variable is not defined")
            .to_string();
        return Err(Error::new(ErrorKind::UndefinedError, message));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        register_filters(&mut env);
        env
    }

    fn render(template: &str) -> Result<String, Error> {
        env().render_str(template, minijinja::context! {})
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(render("{{ 'abc' | upper }}").unwrap(), "ABC");
        assert_eq!(render("{{ 'hello world' | title }}").unwrap(), "Hello World");
        assert_eq!(render("{{ '  x ' | trim }}").unwrap(), "x");
        assert_eq!(render("{{ 'a-b' | replace('-', '+') }}").unwrap(), "a+b");
    }

    #[test]
    fn test_string_filter_rejects_number() {
        let err = render("{{ 5 | upper }}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_regex_filters() {
        assert_eq!(
            render("{{ 'host-01' | regex_replace('(\\\\w+)-(\\\\d+)', '\\\\2-\\\\1') }}").unwrap(),
            "01-host"
        );
        assert_eq!(
            render("{{ 'version 1.2.3' | regex_search('(\\\\d+)\\\\.') }}").unwrap(),
            "1"
        );
    }

    #[test]
    fn test_base64() {
        assert_eq!(render("{{ 'hi' | b64encode }}").unwrap(), "aGk=");
        assert_eq!(render("{{ 'aGk=' | b64decode }}").unwrap(), "hi");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(render("{{ '42' | int + 1 }}").unwrap(), "43");
        assert_eq!(render("{{ 'yes' | bool }}").unwrap(), "true");
        assert_eq!(render("{{ '2.5' | float }}").unwrap(), "2.5");
        assert!(render("{{ [1] | int }}").is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
