//! Local transport: commands run on the control node through `sh -c`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};

#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl LocalConnection {
    /// Named after this machine's hostname
    pub fn new() -> Self {
        let identifier = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self::named(identifier)
    }

    /// Named after the inventory host it serves
    pub fn named(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

fn shell(command: &str, options: &ExecuteOptions) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // a timed-out child must not outlive the task
        .kill_on_drop(true);
    if let Some(dir) = &options.chdir {
        cmd.current_dir(dir);
    }
    cmd
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(host = %self.identifier, %command, "Running local command");

        let spawn_error = |source| ConnectionError::Spawn {
            command: command.to_string(),
            source,
        };
        let running = shell(command, &options)
            .spawn()
            .map_err(spawn_error)?
            .wait_with_output();

        let output = match options.timeout {
            Some(after) => tokio::time::timeout(after, running).await.map_err(|_| {
                ConnectionError::Timeout {
                    command: command.to_string(),
                    after,
                }
            })?,
            None => running.await,
        }
        .map_err(spawn_error)?;

        let result = CommandResult::from(output);
        trace!(rc = result.rc, stdout_len = result.stdout.len(), "Local command finished");
        Ok(result)
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}
