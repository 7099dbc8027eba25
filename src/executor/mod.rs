//! Core execution engine
//!
//! The executor runs a playbook's plays in order. Within a play every
//! selected host gets its own tokio task, admitted through a semaphore of
//! width `forks`; a host walks its task list sequentially and a failure on
//! one host never stops another.
//!
//! ```text
//! run_playbook
//!   ├─ validate selectors and modules (structural errors abort here)
//!   └─ for each play
//!        ├─ resolve hosts (pattern ∩ limit, minus hosts failed earlier)
//!        ├─ per host: effective vars → HostRunner (spawned, bounded)
//!        └─ join → PlayReport
//! ```

mod host;
pub mod report;
pub mod task;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::{ConnectionProvider, LocalConnectionProvider};
use crate::inventory::{Inventory, InventoryError};
use crate::modules::ModuleRegistry;
use crate::playbook::{Play, Playbook};
use crate::template::TemplateEngine;
use crate::vars::{PlayScope, VarResolver};
use crate::vault::Vault;

use host::{HostRunner, PlayRun};
pub use report::{HostReport, HostState, HostStats, PlayReport, RunReport};
pub use task::{TagFilter, TaskResult, TaskStatus};

/// Errors that abort a run before any host is scheduled
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("play '{play}' uses unknown module '{module}' in task '{task}'")]
    UnknownModule {
        play: String,
        task: String,
        module: String,
    },
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of parallel host executions
    pub forks: usize,
    /// Dry-run mode, forwarded to modules
    pub check_mode: bool,
    /// Stop a loop at its first failed item
    pub fail_fast_loops: bool,
    /// Extra variables from the command line (highest precedence)
    pub extra_vars: IndexMap<String, serde_yaml::Value>,
    /// Only run tasks with these tags
    pub tags: Vec<String>,
    /// Never run tasks with these tags
    pub skip_tags: Vec<String>,
    /// Further restrict every play's hosts to this pattern
    pub limit: Option<String>,
    /// Cancel the run after this long
    pub run_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            forks: 5,
            check_mode: false,
            fail_fast_loops: false,
            extra_vars: IndexMap::new(),
            tags: Vec::new(),
            skip_tags: Vec::new(),
            limit: None,
            run_timeout: None,
        }
    }
}

/// The main executor engine
pub struct Executor {
    config: ExecutorConfig,
    inventory: Arc<Inventory>,
    modules: ModuleRegistry,
    connections: Arc<dyn ConnectionProvider>,
    templates: TemplateEngine,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Executor {
    /// Create an executor with the built-in modules and local connections
    pub fn new(config: ExecutorConfig, inventory: Inventory) -> Self {
        let forks = config.forks.max(1);
        Self {
            config,
            inventory: Arc::new(inventory),
            modules: ModuleRegistry::with_builtins(),
            connections: Arc::new(LocalConnectionProvider),
            templates: TemplateEngine::new(),
            semaphore: Arc::new(Semaphore::new(forks)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = modules;
        self
    }

    pub fn with_connection_provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = provider;
        self
    }

    /// Key used to decrypt vault secrets when templates reference them
    pub fn with_vault(mut self, vault: Arc<Vault>) -> Self {
        self.templates = self.templates.with_vault(vault);
        self
    }

    /// Token that cancels the run; clone it to abort from elsewhere
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Run a complete playbook.
    ///
    /// Structural problems (unknown host selectors or modules) fail before
    /// anything runs. Host failures are reported, not returned as errors.
    #[instrument(skip(self, playbook), fields(plays = playbook.plays.len()))]
    pub async fn run_playbook(&self, playbook: &Playbook) -> ExecutorResult<RunReport> {
        self.validate(playbook)?;

        let mut report = RunReport::new(self.config.check_mode);
        info!(run_id = %report.run_id, check_mode = self.config.check_mode, "Starting run");

        let timer = self.config.run_timeout.map(|timeout| {
            let token = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        warn!(?timeout, "Run timeout reached, cancelling");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let mut failed_hosts: HashSet<String> = HashSet::new();
        for play in &playbook.plays {
            if self.cancel.is_cancelled() {
                break;
            }
            let play_report = self.run_play(play, &failed_hosts).await?;
            failed_hosts.extend(
                play_report
                    .hosts
                    .values()
                    .filter(|h| h.state == HostState::Failed)
                    .map(|h| h.host.clone()),
            );
            report.plays.push(play_report);
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        report.cancelled = self.cancel.is_cancelled();
        report.finish();
        info!(
            run_id = %report.run_id,
            failed = report.has_failures(),
            cancelled = report.cancelled,
            "Run finished"
        );
        Ok(report)
    }

    /// Run a single play, skipping hosts in `exclude`
    #[instrument(skip(self, play, exclude), fields(play = %play.name))]
    pub async fn run_play(
        &self,
        play: &Play,
        exclude: &HashSet<String>,
    ) -> ExecutorResult<PlayReport> {
        info!(hosts = %play.hosts, "Starting play");
        let mut play_report = PlayReport {
            name: play.name.clone(),
            hosts: IndexMap::new(),
        };

        let hosts: Vec<_> = self
            .select_hosts(&play.hosts)?
            .into_iter()
            .filter(|h| !exclude.contains(&h.name))
            .collect();

        if hosts.is_empty() {
            warn!("No hosts matched, skipping play");
            return Ok(play_report);
        }
        debug!(count = hosts.len(), "Executing on hosts");

        let run = Arc::new(PlayRun {
            name: play.name.clone(),
            tasks: play.all_tasks(),
            handlers: play.all_handlers().into(),
            r#become: play.r#become,
            check_mode: self.config.check_mode,
            fail_fast_loops: self.config.fail_fast_loops,
            tags: TagFilter::new(
                self.config.tags.iter().cloned(),
                self.config.skip_tags.iter().cloned(),
            ),
            modules: self.modules.clone(),
            templates: self.templates.clone(),
            connections: Arc::clone(&self.connections),
            cancel: self.cancel.clone(),
        });

        let scope = PlayScope {
            play_vars: Some(&play.vars),
            roles: play
                .loaded_roles
                .iter()
                .map(|r| (r.name.as_str(), &r.defaults, &r.vars))
                .collect(),
        };
        let resolver = VarResolver::new(&self.inventory);

        let mut names = Vec::with_capacity(hosts.len());
        let handles: Vec<_> = hosts
            .into_iter()
            .map(|host| {
                names.push(host.name.clone());
                let vars = resolver.effective_vars(host, &scope, &self.config.extra_vars);
                let runner = HostRunner::new(Arc::clone(&run), host.clone(), vars);
                let semaphore = Arc::clone(&self.semaphore);

                tokio::spawn(async move {
                    // The semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    runner.run().await
                })
            })
            .collect();

        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            let host_report = joined.unwrap_or_else(|e| {
                error!(host = %name, error = %e, "Host task aborted");
                let mut report = HostReport::new(name.clone());
                report.record(TaskResult::failed("<internal>", "", e.to_string()));
                report.state = HostState::Failed;
                report
            });
            play_report.hosts.insert(name, host_report);
        }

        info!("Play completed");
        Ok(play_report)
    }

    /// Hosts a play selector resolves to, narrowed by `limit`
    fn select_hosts(&self, pattern: &str) -> ExecutorResult<Vec<&crate::inventory::Host>> {
        let mut hosts = self.inventory.hosts_for_pattern(pattern)?;
        if let Some(limit) = &self.config.limit {
            let allowed: HashSet<&str> = self
                .inventory
                .hosts_for_pattern(limit)?
                .into_iter()
                .map(|h| h.name.as_str())
                .collect();
            hosts.retain(|h| allowed.contains(h.name.as_str()));
        }
        Ok(hosts)
    }

    /// Check selectors and module names of every play up front
    fn validate(&self, playbook: &Playbook) -> ExecutorResult<()> {
        for play in &playbook.plays {
            self.select_hosts(&play.hosts)?;

            let tasks = play.all_tasks();
            let handlers = play.all_handlers();
            let all = tasks.iter().chain(handlers.iter().map(|h| &h.task));
            for task in all {
                if !self.modules.contains(&task.module) {
                    return Err(ExecutorError::UnknownModule {
                        play: play.name.clone(),
                        task: task.label().to_string(),
                        module: task.module.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventorySource;
    use crate::playbook::Task;

    fn inventory() -> Inventory {
        Inventory::resolve(&[InventorySource::yaml(
            r#"
all:
  children:
    web:
      hosts:
        web1: { ansible_connection: local }
        web2: { ansible_connection: local }
    db:
      hosts:
        db1: { ansible_connection: local }
"#,
        )])
        .unwrap()
    }

    fn playbook(play: Play) -> Playbook {
        Playbook {
            plays: vec![play],
            source_path: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_module_is_structural() {
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        let play = Play::new("p", "web").with_task(Task::new("x", "nope"));
        let err = executor.run_playbook(&playbook(play)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownModule { module, .. } if module == "nope"));
    }

    #[tokio::test]
    async fn test_unknown_group_is_structural() {
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        let play = Play::new("p", "missing").with_task(Task::new("x", "debug"));
        let err = executor.run_playbook(&playbook(play)).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::Inventory(InventoryError::UnknownGroup(_))
        ));
    }

    #[tokio::test]
    async fn test_limit_narrows_hosts() {
        let config = ExecutorConfig {
            limit: Some("web1".to_string()),
            ..Default::default()
        };
        let executor = Executor::new(config, inventory());
        let play = Play::new("p", "all").with_task(Task::new("hi", "debug").with_param("msg", "hi"));
        let report = executor.run_playbook(&playbook(play)).await.unwrap();

        let hosts: Vec<&String> = report.plays[0].hosts.keys().collect();
        assert_eq!(hosts, vec!["web1"]);
    }

    #[tokio::test]
    async fn test_zero_hosts_is_noop() {
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        let play = Play::new("p", "zz*").with_task(Task::new("hi", "debug"));
        let report = executor.run_playbook(&playbook(play)).await.unwrap();

        assert!(report.plays[0].hosts.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_failed_hosts_leave_later_plays() {
        let executor = Executor::new(ExecutorConfig::default(), inventory());
        let first = Play::new("first", "all").with_task(
            Task::new("fail db", "fail").with_when("inventory_hostname == 'db1'"),
        );
        let second = Play::new("second", "all").with_task(Task::new("hi", "debug"));
        let pb = Playbook {
            plays: vec![first, second],
            source_path: None,
        };
        let report = executor.run_playbook(&pb).await.unwrap();

        assert_eq!(report.plays[0].hosts["db1"].state, HostState::Failed);
        assert!(!report.plays[1].hosts.contains_key("db1"));
        assert_eq!(report.plays[1].hosts.len(), 2);
        assert_eq!(report.exit_code(), 2);
    }
}
