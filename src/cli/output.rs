//! Terminal output.
//!
//! Human mode prints the play/task/recap layout after each playbook, with
//! results grouped by task across hosts. JSON mode prints only the
//! [`RunReport`], so stdout stays machine readable.

use colored::{Color, ColoredString, Colorize};
use converge::executor::{HostStats, PlayReport, RunReport, TaskResult, TaskStatus};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::time::Duration;

const RULE_WIDTH: usize = 80;

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Ok => Color::Green,
        TaskStatus::Changed => Color::Yellow,
        TaskStatus::Skipped => Color::Cyan,
        TaskStatus::Failed | TaskStatus::Unreachable => Color::Red,
    }
}

fn status_label(status: TaskStatus) -> ColoredString {
    let label = status.to_string().color(status_color(status));
    if status.is_failure() {
        label.bold()
    } else {
        label
    }
}

/// `TITLE [name] ****` padded to the rule width
fn rule(title: &str) -> String {
    let stars = "*".repeat(RULE_WIDTH.saturating_sub(title.len() + 1));
    format!("\n{} {}", title.bold(), stars.bright_black())
}

/// Loop items print bare when they are strings
fn item_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct OutputFormatter {
    json_mode: bool,
    verbosity: u8,
}

impl OutputFormatter {
    /// Color is switched off process-wide when `use_color` is false
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        if !use_color {
            colored::control::set_override(false);
        }
        Self {
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => self.error(&format!("cannot serialize output: {}", e)),
        }
    }

    /// `changed: [web1] (item=a) => msg`. The message is shown for
    /// failures, for `debug`, and at `-v` and above.
    fn result_line(&self, host: &str, result: &TaskResult) -> String {
        let mut line = format!("{}", status_label(result.status));
        if result.ignored {
            line.push_str(" (ignored)");
        }
        line.push_str(&format!(": [{}]", host.bold()));
        if let Some(item) = &result.item {
            line.push_str(&format!(" (item={})", item_text(item)));
        }
        let verbose_msg =
            result.status.is_failure() || result.module == "debug" || self.verbosity > 0;
        if let Some(msg) = result.msg.as_deref().filter(|_| verbose_msg) {
            line.push_str(&format!(" => {}", msg));
        }
        line
    }

    fn play(&self, play: &PlayReport) {
        println!("{}", rule(&format!("PLAY [{}]", play.name)));
        if play.hosts.is_empty() {
            println!("skipping: no hosts matched");
            return;
        }

        // (is_handler, task name) -> results in host order
        let mut tasks: IndexMap<(bool, &str), Vec<(&str, &TaskResult)>> = IndexMap::new();
        for (host, report) in &play.hosts {
            for result in &report.results {
                tasks
                    .entry((result.handler, result.task.as_str()))
                    .or_default()
                    .push((host.as_str(), result));
            }
        }

        for ((is_handler, task), results) in tasks {
            let kind = if is_handler { "RUNNING HANDLER" } else { "TASK" };
            println!("{}", rule(&format!("{} [{}]", kind, task)));
            for (host, result) in results {
                println!("{}", self.result_line(host, result));
                if self.verbosity > 1 {
                    self.print_registered(result);
                }
            }
        }
    }

    fn print_registered(&self, result: &TaskResult) {
        let Some(value) = &result.result else {
            return;
        };
        if let Ok(pretty) = serde_json::to_string_pretty(value) {
            for line in pretty.lines() {
                println!("    {}", line);
            }
        }
    }

    fn recap(&self, stats: &IndexMap<String, HostStats>) {
        println!("{}", rule("PLAY RECAP"));
        for (host, s) in stats {
            let host = if s.failed > 0 || s.unreachable > 0 {
                host.red().bold()
            } else if s.changed > 0 {
                host.yellow()
            } else {
                host.green()
            };
            let counters = [
                ("ok", s.ok, Color::Green),
                ("changed", s.changed, Color::Yellow),
                ("unreachable", s.unreachable, Color::Red),
                ("failed", s.failed, Color::Red),
                ("skipped", s.skipped, Color::Cyan),
                ("ignored", s.ignored, Color::Blue),
            ]
            .iter()
            .map(|(label, count, color)| {
                let text = format!("{}={:<4}", label, count);
                if *count > 0 {
                    text.color(*color).to_string()
                } else {
                    text.dimmed().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
            println!("{:<30} : {}", host, counters);
        }
    }

    /// Everything one playbook produced: each play, the recap, timing
    pub fn run_report(&self, report: &RunReport, elapsed: Duration) {
        if self.json_mode {
            self.print_json(report);
            return;
        }

        report.plays.iter().for_each(|play| self.play(play));
        self.recap(&report.stats());
        if report.cancelled {
            self.warning("run cancelled, remaining tasks were not scheduled");
        }
        println!("\nFinished in {}", format_duration(elapsed));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "ERROR:".red().bold(), message);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "WARNING:".yellow().bold(), message);
    }

    /// Progress notes; silent in JSON mode
    pub fn info(&self, message: &str) {
        if !self.json_mode {
            println!("{}", message);
        }
    }

    /// A titled list, or a JSON array of the items in JSON mode
    pub fn list(&self, title: &str, items: &[String]) {
        if self.json_mode {
            self.print_json(items);
            return;
        }
        println!("{}", title.cyan().bold());
        for item in items {
            println!("    {}", item);
        }
    }

    pub fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

/// `850ms`, `4.200s`, `2m 5s` or `1h 0m 12s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0 => format!("{}ms", duration.subsec_millis()),
        1..=59 => format!("{}.{:03}s", secs, duration.subsec_millis()),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m {}s", secs / 3600, secs % 3600 / 60, secs % 60),
    }
}
