//! Diagnostics from raw process output
//!
//! Driver scripts frame their error text between two marker lines on stderr.
//! Ansible transcripts report per-host failures on `fatal:` lines, attributed to
//! the most recent `TASK [...]` header.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Opening marker line of a driver error block
pub const ERROR_OPEN: &str = "ERROR MESSAGE --8<------";
/// Closing marker line of a driver error block
pub const ERROR_CLOSE: &str = "ERROR MESSAGE ------>8--";

static ERROR_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?ms)^{}\n(.*?){}$",
        regex::escape(ERROR_OPEN),
        regex::escape(ERROR_CLOSE)
    ))
    .expect("static regex")
});
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^TASK \[(.*)\]").expect("static regex"));
static FATAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^fatal:").expect("static regex"));
static FATAL_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^fatal: \[([^\]]+)\]: .* => (\{.*\})$").expect("static regex")
});
static FATAL_HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^fatal: \[([^\]]+)\]: .* =>").expect("static regex"));

/// Extract the framed error message from driver stderr
///
/// Lines between the markers are trimmed and joined with single spaces. Returns
/// `None` when no (non-empty) block is present.
pub fn extract_error_message(text: &str) -> Option<String> {
    let block = ERROR_BLOCK_RE.captures(text)?.get(1)?.as_str();

    let message = block
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    (!message.is_empty()).then_some(message)
}

/// One failed task on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Inventory host, `UNKNOWN` if the line could not be attributed
    pub host: String,
    /// Task name, `UNKNOWN` before the first task header
    pub task: String,
    /// `msg` from the JSON payload, empty when absent
    pub message: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- {:<15} : TASK[{}]", self.host, self.task)?;
        if !self.message.is_empty() {
            write!(f, " - {}", self.message)?;
        }
        Ok(())
    }
}

/// Collect every `fatal:` line of an `ansible-playbook` transcript
pub fn parse_transcript(stdout: &str) -> Vec<TaskFailure> {
    let mut failures = Vec::new();
    let mut task = "UNKNOWN".to_string();

    for line in stdout.lines() {
        if let Some(caps) = TASK_RE.captures(line) {
            task = caps[1].to_string();
        }

        if !FATAL_RE.is_match(line) {
            continue;
        }

        let mut host = "UNKNOWN".to_string();
        let mut message = String::new();

        if let Some(caps) = FATAL_JSON_RE.captures(line) {
            host = caps[1].to_string();
            message = json_message(&caps[2]).unwrap_or_default();
        } else if let Some(caps) = FATAL_HOST_RE.captures(line) {
            host = caps[1].to_string();
        }

        failures.push(TaskFailure {
            host,
            task: task.clone(),
            message,
        });
    }

    failures
}

/// Render failures one per line
pub fn format_report(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn json_message(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let msg = value.get("msg")?.as_str()?;
    Some(msg.trim().replace('\n', " "))
}
