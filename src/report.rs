//! Prints the outcome of Salt commands for the person watching the pipeline.
//!
//! As with most reporters, the logic lives in writer-generic functions ([_state_result] and
//! [_command_result]) that tests can feed with buffers. [Reporter], the production [Report]
//! implementation, locks stdout and stderr just before reporting and releases them as soon as it
//! is done. This keeps one response's output together even if several tasks report at once.

use crate::response::{has_changes, SaltResponse, StateKey, StateOutcome, StateResult, Status};
use serde_json::Value;
use std::fmt::{self, Display};
use std::io::{self, Write};
use std::ops::DerefMut;

/// Prints Salt responses to keep the user informed.
pub trait Report {
    /// Reports a state run. With `only_changes`, states that succeeded without changes are left
    /// out; failures and pending changes are always shown.
    fn state_result(&mut self, response: &SaltResponse, only_changes: bool) -> io::Result<()>;

    /// Reports the raw output of an execution or runner command.
    fn command_result(&mut self, response: &SaltResponse) -> io::Result<()>;
}

/// The real, production-ready [Report] implementation. Uses the real stdout/stderr.
#[derive(Clone, Debug, Default)]
pub struct Reporter;

impl Report for Reporter {
    fn state_result(&mut self, response: &SaltResponse, only_changes: bool) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        _state_result(&mut stdout, &mut stderr, response, only_changes)
    }

    fn command_result(&mut self, response: &SaltResponse) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        _command_result(&mut stdout, response)
    }
}

/// Per-node tally of state outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Succeeded, with or without changes.
    pub succeeded: usize,
    pub changed: usize,
    pub pending: usize,
    pub failed: usize,
}

impl Summary {
    fn count(&mut self, status: Status) {
        match status {
            Status::Unchanged => self.succeeded += 1,
            Status::Changed => {
                self.succeeded += 1;
                self.changed += 1;
            }
            Status::Pending => self.pending += 1,
            Status::Failed => self.failed += 1,
        }
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded ({} changed), {} pending, {} failed",
            self.succeeded, self.changed, self.pending, self.failed,
        )
    }
}

fn write_indented(
    mut writer: impl Write,
    header: impl Display,
    content: impl AsRef<str>,
) -> io::Result<()> {
    //                1234
    writeln!(writer, "    {header}")?;
    for line in content.as_ref().lines() {
        //                12345678
        writeln!(writer, "        {line}")?;
    }
    Ok(())
}

// Renders a JSON value as YAML for display. Falls back to JSON if that somehow fails.
fn to_yaml(value: &Value) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|_| value.to_string())
}

/// A testable method containing the logic for reporting a state run.
pub fn _state_result<OT: Write, ET: Write, O: DerefMut<Target = OT>, E: DerefMut<Target = ET>>(
    mut stdout: O,
    mut stderr: E,
    response: &SaltResponse,
    only_changes: bool,
) -> io::Result<()> {
    if response.is_empty() {
        writeln!(&mut stderr, "Salt API returned an empty response")?;
        return Ok(());
    }

    for (node, outcome) in response.state_outcomes() {
        match outcome {
            StateOutcome::States(states) => {
                let mut summary = Summary::default();
                for (key, state) in &states {
                    let status = state.status();
                    summary.count(status);
                    if only_changes && status == Status::Unchanged {
                        continue;
                    }
                    write_state(stdout.deref_mut(), stderr.deref_mut(), node, key, state)?;
                }
                writeln!(&mut stdout, "[{node}] Summary: {summary}")?;
            }
            StateOutcome::Errors(errors) => {
                writeln!(
                    &mut stderr,
                    "[{node}] State run failed. See below for details.",
                )?;
                write_indented(stderr.deref_mut(), "Errors:", errors.join("\n"))?;
            }
            StateOutcome::Other(value) => {
                writeln!(
                    &mut stderr,
                    "[{node}] Returned something other than state results.",
                )?;
                write_indented(stderr.deref_mut(), "Returned:", to_yaml(&value))?;
            }
        }
    }
    Ok(())
}

fn write_state(
    stdout: &mut impl Write,
    stderr: &mut impl Write,
    node: &str,
    key: &str,
    state: &StateResult,
) -> io::Result<()> {
    // Labels are padded to the same width so titles line up.
    match state.status() {
        Status::Unchanged => write_state_lines(stdout, node, "Completed", key, state, false),
        Status::Changed => write_state_lines(stdout, node, "Changed  ", key, state, false),
        Status::Pending => write_state_lines(stdout, node, "Pending  ", key, state, true),
        Status::Failed => write_state_lines(stderr, node, "Failed   ", key, state, true),
    }
}

fn write_state_lines(
    mut writer: impl Write,
    node: &str,
    label: &str,
    key: &str,
    state: &StateResult,
    show_comment: bool,
) -> io::Result<()> {
    writeln!(writer, "[{node}] {label} {}", StateKey::title_of(key))?;
    if show_comment && !state.comment.is_empty() {
        write_indented(&mut writer, "Comment:", &state.comment)?;
    }
    if has_changes(&state.changes) {
        write_indented(&mut writer, "Changes:", to_yaml(&state.changes))?;
    }
    Ok(())
}

/// A testable method containing the logic for reporting a command's output.
pub fn _command_result<OT: Write, O: DerefMut<Target = OT>>(
    mut stdout: O,
    response: &SaltResponse,
) -> io::Result<()> {
    for entry in &response.returns {
        match entry {
            Value::Object(nodes) => {
                for (node, output) in nodes {
                    write_output(stdout.deref_mut(), node, output)?;
                }
            }
            // Runners return their result directly instead of per node.
            Value::Null => {}
            other => write_output(stdout.deref_mut(), "salt", other)?,
        }
    }
    Ok(())
}

fn write_output(mut writer: impl Write, node: &str, output: &Value) -> io::Result<()> {
    writeln!(writer, "[{node}] Returned:")?;
    let text = match output {
        Value::String(text) => text.clone(),
        other => to_yaml(other),
    };
    for line in text.lines() {
        //                1234
        writeln!(writer, "    {line}")?;
    }
    Ok(())
}
