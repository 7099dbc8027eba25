//! Connection layer.
//!
//! A [`Connection`] is an opaque capability to run commands on one host.
//! The executor only asks a [`ConnectionProvider`] for a connection when a
//! task actually needs to reach the host, so purely local logic never opens
//! a transport. Any error a provider or connection returns is what marks a
//! host unreachable.
//!
//! Only the local transport ships with the crate. Hosts declaring another
//! `ansible_connection` are reported as unsupported unless a different
//! provider is installed with
//! [`Executor::with_connection_provider`](crate::executor::Executor::with_connection_provider).

pub mod local;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use local::LocalConnection;

use crate::inventory::{ConnectionType, Host};

#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The host could not be reached at all.
    #[error("connection to '{host}' failed: {message}")]
    ConnectionFailed { host: String, message: String },

    #[error("connection type '{kind}' is not supported for host '{host}'")]
    Unsupported { host: String, kind: ConnectionType },

    #[error("'{command}' did not finish within {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },

    /// The command could not be started or awaited.
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Exit status and captured output of one command.
///
/// A non-zero `rc` is a normal result, not an error; modules decide what
/// it means.
///
/// ```rust
/// use converge::connection::CommandResult;
///
/// let done = CommandResult::ok("hello");
/// assert!(done.succeeded());
///
/// let broken = CommandResult::exited(2, "", "no such file");
/// assert_eq!(broken.detail(), "no such file");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// A zero exit with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::exited(0, stdout, "")
    }

    pub fn exited(rc: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            rc,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.rc == 0
    }

    /// The most useful line of output for an error message: stderr when
    /// the command wrote any, stdout otherwise.
    pub fn detail(&self) -> &str {
        match self.stderr.trim() {
            "" => self.stdout.trim(),
            stderr => stderr,
        }
    }
}

impl From<std::process::Output> for CommandResult {
    fn from(output: std::process::Output) -> Self {
        // Killed by a signal: no exit code
        Self::exited(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        )
    }
}

/// Per-command execution settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub chdir: Option<PathBuf>,
    /// Extra environment, applied in order
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn chdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chdir = Some(dir.into());
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An open transport to one host
#[async_trait]
pub trait Connection: Send + Sync {
    /// Name used in logs, usually the inventory hostname
    fn identifier(&self) -> &str;

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool>;

    /// Release the transport. Called once when the host's play run ends.
    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

/// Opens connections to inventory hosts
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Serves `ansible_connection=local` hosts and rejects every other kind
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnectionProvider;

#[async_trait]
impl ConnectionProvider for LocalConnectionProvider {
    async fn connect(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        match host.connection_type() {
            ConnectionType::Local => Ok(Arc::new(LocalConnection::named(host.name.clone()))),
            kind => Err(ConnectionError::Unsupported {
                host: host.name.clone(),
                kind,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_prefers_stderr() {
        assert_eq!(CommandResult::exited(1, "out\n", "err\n").detail(), "err");
        assert_eq!(CommandResult::exited(1, "out\n", "  ").detail(), "out");
        assert!(!CommandResult::exited(1, "", "").succeeded());
    }

    #[test]
    fn test_options_builder() {
        let options = ExecuteOptions::default()
            .chdir("/srv")
            .var("LANG", "C")
            .var("TZ", "UTC")
            .timeout(Duration::from_secs(5));
        assert_eq!(options.chdir, Some(PathBuf::from("/srv")));
        assert_eq!(options.env[1], ("TZ".to_string(), "UTC".to_string()));
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_provider_rejects_remote_hosts() {
        let host = Host::new("web1");
        let err = LocalConnectionProvider.connect(&host).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Unsupported { kind: ConnectionType::Ssh, .. }));
    }

    #[tokio::test]
    async fn test_provider_serves_local_hosts() {
        let host = Host::parse("box ansible_connection=local").unwrap();
        let conn = LocalConnectionProvider.connect(&host).await.unwrap();
        assert_eq!(conn.identifier(), "box");
    }
}
