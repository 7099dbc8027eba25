//! Role definitions
//!
//! A role is a directory of reusable automation:
//!
//! ```text
//! roles/webserver/
//!   tasks/main.yml
//!   handlers/main.yml
//!   defaults/main.yml
//!   vars/main.yml
//! ```
//!
//! Every file is optional.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::playbook::{Handler, PlaybookError, PlaybookResult, RoleRef, Task};

/// A role containing reusable automation
#[derive(Debug, Clone, Default)]
pub struct Role {
    /// Role name
    pub name: String,
    /// Role path
    pub path: PathBuf,
    pub tasks: Vec<Task>,
    pub handlers: Vec<Handler>,
    /// Lowest-precedence variables
    pub defaults: IndexMap<String, serde_yaml::Value>,
    /// Role variables, including parameters given where the role is referenced
    pub vars: IndexMap<String, serde_yaml::Value>,
}

impl Role {
    /// Create an empty role
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Find and load a role from the first search directory containing it
    pub fn load(role_ref: &RoleRef, search_paths: &[PathBuf]) -> PlaybookResult<Self> {
        let name = role_ref.name();
        let path = search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_dir())
            .ok_or_else(|| PlaybookError::RoleNotFound {
                name: name.to_string(),
                searched: search_paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        let mut role = Self::load_dir(name, &path)?;
        if let RoleRef::Full { tags, vars, .. } = role_ref {
            role.vars.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            for task in &mut role.tasks {
                for tag in tags {
                    if !task.tags.contains(tag) {
                        task.tags.push(tag.clone());
                    }
                }
            }
        }

        tracing::debug!(role = %name, path = %path.display(), tasks = role.tasks.len(), "Loaded role");
        Ok(role)
    }

    /// Load a role from its directory
    pub fn load_dir(name: &str, path: &Path) -> PlaybookResult<Self> {
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            tasks: read_main(path, "tasks")?.unwrap_or_default(),
            handlers: read_main(path, "handlers")?.unwrap_or_default(),
            defaults: read_main(path, "defaults")?.unwrap_or_default(),
            vars: read_main(path, "vars")?.unwrap_or_default(),
        })
    }
}

/// Read `<dir>/main.yml` (or `main.yaml`) if present
fn read_main<T: DeserializeOwned>(role_dir: &Path, section: &str) -> PlaybookResult<Option<T>> {
    let dir = role_dir.join(section);
    let Some(file) = ["main.yml", "main.yaml"]
        .iter()
        .map(|f| dir.join(f))
        .find(|f| f.is_file())
    else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(&file).map_err(|source| PlaybookError::Io {
        path: file.clone(),
        source,
    })?;
    // An empty file parses as null
    let parsed: Option<T> = serde_yaml::from_str(&content).map_err(|source| PlaybookError::Yaml {
        path: file.display().to_string(),
        source,
    })?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_role() {
        let dir = tempfile::tempdir().unwrap();
        let roles = dir.path().join("roles");
        write(&roles, "web/tasks/main.yml", "- name: hi\n  debug: msg=hi\n");
        write(&roles, "web/handlers/main.yml", "- name: restart\n  command: echo restart\n");
        write(&roles, "web/defaults/main.yml", "port: 80\n");

        let role = Role::load(&RoleRef::Simple("web".into()), &[roles]).unwrap();
        assert_eq!(role.tasks.len(), 1);
        assert_eq!(role.handlers[0].name, "restart");
        assert_eq!(role.defaults["port"], serde_yaml::Value::from(80));
        assert!(role.vars.is_empty());
    }

    #[test]
    fn test_role_params_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "db/tasks/main.yml", "- command: echo\n");
        write(dir.path(), "db/vars/main.yml", "engine: pg\n");

        let role_ref: RoleRef =
            serde_yaml::from_str("{ role: db, tags: [data], port: 5432 }").unwrap();
        let role = Role::load(&role_ref, &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(role.vars["port"], serde_yaml::Value::from(5432));
        assert_eq!(role.vars["engine"], serde_yaml::Value::from("pg"));
        assert_eq!(role.tasks[0].tags, vec!["data"]);
    }

    #[test]
    fn test_missing_role() {
        let dir = tempfile::tempdir().unwrap();
        let err = Role::load(&RoleRef::Simple("nope".into()), &[dir.path().to_path_buf()]);
        assert!(matches!(err, Err(PlaybookError::RoleNotFound { name, .. }) if name == "nope"));
    }
}
