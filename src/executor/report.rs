//! Run reporting
//!
//! A [`RunReport`] records every host's terminal state and every task's
//! outcome for each play, plus recap statistics. It serializes to JSON.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{TaskResult, TaskStatus};
use crate::error::{EXIT_CANCELLED, EXIT_HOST_FAILED};

/// Per-host state within a play
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    #[default]
    Pending,
    Running,
    /// The task list ran to the end
    Completed,
    /// A task failed without `ignore_errors`
    Failed,
    /// Every task was skipped or filtered out
    Skipped,
    /// Stopped by run-wide cancellation
    Cancelled,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HostState::Pending | HostState::Running)
    }

    /// Worst of two states, used to summarize a host across plays
    fn combine(self, other: HostState) -> HostState {
        fn severity(state: HostState) -> u8 {
            match state {
                HostState::Pending => 0,
                HostState::Skipped => 1,
                HostState::Running => 2,
                HostState::Completed => 3,
                HostState::Cancelled => 4,
                HostState::Failed => 5,
            }
        }
        if severity(other) > severity(self) {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HostState::Pending => "pending",
            HostState::Running => "running",
            HostState::Completed => "completed",
            HostState::Failed => "failed",
            HostState::Skipped => "skipped",
            HostState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Statistics for the play recap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unreachable: usize,
    pub ignored: usize,
}

impl HostStats {
    pub fn record(&mut self, result: &TaskResult) {
        match result.status {
            TaskStatus::Ok => self.ok += 1,
            TaskStatus::Changed => self.changed += 1,
            TaskStatus::Skipped => self.skipped += 1,
            TaskStatus::Failed if result.ignored => self.ignored += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Unreachable => self.unreachable += 1,
        }
    }

    pub fn merge(&mut self, other: &HostStats) {
        self.ok += other.ok;
        self.changed += other.changed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.unreachable += other.unreachable;
        self.ignored += other.ignored;
    }
}

/// What happened on one host during one play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    pub state: HostState,
    /// The failure was a connectivity error
    #[serde(default)]
    pub unreachable: bool,
    /// Task and handler results, in execution order
    pub results: Vec<TaskResult>,
    pub stats: HostStats,
}

impl HostReport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: TaskResult) {
        self.stats.record(&result);
        self.results.push(result);
    }

    /// Results produced by handlers
    pub fn handler_results(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| r.handler)
    }

    /// Results for a named task, one per loop item
    pub fn results_for<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a TaskResult> {
        self.results.iter().filter(move |r| r.task == task)
    }
}

/// Outcome of one play
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayReport {
    pub name: String,
    pub hosts: IndexMap<String, HostReport>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub check_mode: bool,
    pub cancelled: bool,
    pub plays: Vec<PlayReport>,
}

impl RunReport {
    pub fn new(check_mode: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            check_mode,
            cancelled: false,
            plays: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Terminal state of every host across all plays (worst state wins)
    pub fn host_states(&self) -> IndexMap<String, HostState> {
        let mut states: IndexMap<String, HostState> = IndexMap::new();
        for report in self.plays.iter().flat_map(|p| p.hosts.values()) {
            let state = states.entry(report.host.clone()).or_default();
            *state = state.combine(report.state);
        }
        states
    }

    /// Recap statistics per host across all plays
    pub fn stats(&self) -> IndexMap<String, HostStats> {
        let mut stats: IndexMap<String, HostStats> = IndexMap::new();
        for report in self.plays.iter().flat_map(|p| p.hosts.values()) {
            stats.entry(report.host.clone()).or_default().merge(&report.stats);
        }
        stats
    }

    /// Reports for one host, one per play it took part in
    pub fn host(&self, name: &str) -> Vec<&HostReport> {
        self.plays.iter().filter_map(|p| p.hosts.get(name)).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.plays
            .iter()
            .flat_map(|p| p.hosts.values())
            .any(|h| h.state == HostState::Failed)
    }

    /// Process exit status: 130 when cancelled, 2 when any host failed, else 0
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.has_failures() {
            EXIT_HOST_FAILED
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, state: HostState) -> HostReport {
        HostReport {
            host: name.to_string(),
            state,
            ..Default::default()
        }
    }

    #[test]
    fn test_stats_record() {
        let mut stats = HostStats::default();
        stats.record(&TaskResult::ok("a", "debug"));
        stats.record(&TaskResult::skipped("b", "debug", "when"));
        let mut ignored = TaskResult::failed("c", "fail", "boom");
        ignored.ignored = true;
        stats.record(&ignored);
        stats.record(&TaskResult::unreachable("d", "command", "down"));

        assert_eq!(
            stats,
            HostStats {
                ok: 1,
                skipped: 1,
                ignored: 1,
                unreachable: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_exit_code_and_states() {
        let mut report = RunReport::new(false);
        let mut play = PlayReport::default();
        play.hosts.insert("a".into(), host("a", HostState::Completed));
        play.hosts.insert("b".into(), host("b", HostState::Completed));
        report.plays.push(play.clone());
        assert_eq!(report.exit_code(), 0);

        play.hosts.insert("b".into(), host("b", HostState::Failed));
        report.plays.push(play);
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.host_states()["b"], HostState::Failed);
        assert_eq!(report.host_states()["a"], HostState::Completed);

        report.cancelled = true;
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_report_serializes() {
        let mut report = RunReport::new(true);
        report.finish();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["check_mode"], serde_json::Value::Bool(true));
        assert!(json["finished_at"].is_string());
    }
}
