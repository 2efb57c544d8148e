//! Ready-made pipeline steps built on [Master::run].
//!
//! Each step builds one [Command], sends it, and applies the success criteria that make sense for
//! that command. Printing the result is left to the caller; see [crate::report].

use crate::core::{Command, Target};
use crate::error::{Error, Result};
use crate::http::HttpInterface;
use crate::master::Master;
use crate::response::SaltResponse;
use anyhow::Context;
use serde_json::Value;
use shlex::Quoter;
use tracing::{info, warn};

/// Appended to checked shell commands. A node whose output lacks it did not get that far.
pub const SUCCESS_MARKER: &str = "Salt command execution success";

/// Returns the minions matched by `target` that answer `test.ping`, sorted.
pub async fn ping<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
) -> Result<Vec<String>> {
    let response = master
        .run(&Command::local(target.clone(), "test.ping"))
        .await?;
    Ok(response.responding_minions())
}

/// Options for [cmd_run].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CmdOptions {
    /// Verify that the command succeeded on every node.
    pub check_response: bool,

    /// Passed through to the master.
    pub batch: Option<String>,
}

impl Default for CmdOptions {
    fn default() -> Self {
        CmdOptions {
            check_response: true,
            batch: None,
        }
    }
}

/// Runs a shell command on every node matched by `target` (`cmd.shell`).
///
/// When `options.check_response` is set, `&& echo <SUCCESS_MARKER>` is appended to the command,
/// and every node's output must contain the marker. The marker is removed from the returned
/// output.
///
/// # Errors
///
/// With `check_response`, returns [Error::EmptyResponse] if no node answered and
/// [Error::CommandFailed] for the first node whose output lacks the marker.
pub async fn cmd_run<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
    cmd: &str,
    options: &CmdOptions,
) -> Result<SaltResponse> {
    let shell = match options.check_response {
        true => format!("{cmd} && echo {SUCCESS_MARKER}"),
        false => cmd.to_owned(),
    };
    let mut command = Command::local(target.clone(), "cmd.shell").arg(shell);
    if let Some(batch) = &options.batch {
        command = command.batch(batch.clone());
    }

    let mut response = master.run(&command).await?;
    if !options.check_response {
        return Ok(response);
    }

    if response.is_empty() {
        return Err(Error::EmptyResponse);
    }
    for (node, output) in response.nodes() {
        let succeeded = output
            .as_str()
            .is_some_and(|text| text.contains(SUCCESS_MARKER));
        if !succeeded {
            return Err(Error::CommandFailed {
                node: node.to_owned(),
                command: cmd.to_owned(),
                output: match output {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                },
            });
        }
    }

    strip_marker(&mut response);
    Ok(response)
}

/// Joins shell words into one command line for [cmd_run], quoting each word as needed.
///
/// A single word is taken to be a complete command line already and is returned unchanged.
pub fn shell_command<S: AsRef<str>>(words: &[S]) -> anyhow::Result<String> {
    match words {
        [single] => Ok(single.as_ref().to_owned()),
        words => Quoter::new()
            .join(words.iter().map(|word| word.as_ref()))
            .context("could not quote command"),
    }
}

// Removes the success marker line from every string output.
fn strip_marker(response: &mut SaltResponse) {
    let outputs = response
        .returns
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .flat_map(|entry| entry.values_mut());
    for output in outputs {
        if let Value::String(text) = output {
            let kept: Vec<_> = text
                .lines()
                .filter(|line| line.trim() != SUCCESS_MARKER)
                .collect();
            *text = kept.join("\n");
        }
    }
}

/// Options for [enforce_state] and [enforce_highstate].
#[derive(Clone, Debug, PartialEq)]
pub struct StateOptions {
    /// Dry run: report what would change without changing it.
    pub test: bool,

    /// Return [Error::StateFailed] if any state fails. Otherwise failures are only logged.
    pub fail_on_error: bool,

    /// Passed through to the master.
    pub batch: Option<String>,

    /// Extra pillar data for this run.
    pub pillar: Option<Value>,

    /// Wait for a running state job instead of failing immediately.
    pub queue: bool,
}

impl Default for StateOptions {
    fn default() -> Self {
        StateOptions {
            test: false,
            fail_on_error: true,
            batch: None,
            pillar: None,
            queue: false,
        }
    }
}

impl StateOptions {
    // Adds the options that travel as keyword arguments or flags.
    fn apply(&self, mut command: Command) -> Command {
        if self.test {
            command = command.kwarg("test", true);
        }
        if self.queue {
            command = command.kwarg("queue", true);
        }
        if let Some(pillar) = &self.pillar {
            command = command.kwarg("pillar", pillar.clone());
        }
        if let Some(batch) = &self.batch {
            command = command.batch(batch.clone());
        }
        command
    }
}

/// Applies `states` on every node matched by `target` (`state.sls`).
pub async fn enforce_state<H: HttpInterface, S: AsRef<str>>(
    master: &mut Master<H>,
    target: &Target,
    states: &[S],
    options: &StateOptions,
) -> Result<SaltResponse> {
    let states = states
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    let command = options.apply(Command::local(target.clone(), "state.sls").arg(states));
    run_states(master, &command, options).await
}

/// Applies the highstate on every node matched by `target` (`state.highstate`).
pub async fn enforce_highstate<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
    options: &StateOptions,
) -> Result<SaltResponse> {
    let command = options.apply(Command::local(target.clone(), "state.highstate"));
    run_states(master, &command, options).await
}

async fn run_states<H: HttpInterface>(
    master: &mut Master<H>,
    command: &Command,
    options: &StateOptions,
) -> Result<SaltResponse> {
    let response = master.run(command).await?;
    match options.fail_on_error {
        true => response.check()?,
        false => {
            if response.is_empty() {
                warn!(command = %command.title(), "Salt API returned an empty response");
            }
            for failure in response.failures() {
                warn!(%failure, "state failed; continuing");
            }
        }
    }
    info!(command = %command.title(), "state run finished");
    Ok(response)
}

/// Reads pillar `key` on every node matched by `target` (`pillar.get`).
pub async fn get_pillar<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
    key: &str,
) -> Result<SaltResponse> {
    master
        .run(&Command::local(target.clone(), "pillar.get").arg(key))
        .await
}

/// Reads `grain` on every node matched by `target` (`grains.item`).
pub async fn get_grain<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
    grain: &str,
) -> Result<SaltResponse> {
    master
        .run(&Command::local(target.clone(), "grains.item").arg(grain))
        .await
}

/// Syncs custom modules, grains, states, etc. to every node matched by `target`.
pub async fn sync_all<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
) -> Result<SaltResponse> {
    master
        .run(&Command::local(target.clone(), "saltutil.sync_all"))
        .await
}

/// Refreshes pillar data on every node matched by `target`.
pub async fn refresh_pillar<H: HttpInterface>(
    master: &mut Master<H>,
    target: &Target,
) -> Result<SaltResponse> {
    master
        .run(&Command::local(target.clone(), "saltutil.refresh_pillar"))
        .await
}

/// Runs runner function `fun` on the master.
pub async fn run_runner<H: HttpInterface>(
    master: &mut Master<H>,
    fun: &str,
    args: Vec<Value>,
) -> Result<SaltResponse> {
    master.run(&Command::runner(fun).args(args)).await
}

/// Lists the minions the master currently considers up (`manage.up`), sorted.
pub async fn minions_up<H: HttpInterface>(master: &mut Master<H>) -> Result<Vec<String>> {
    let response = run_runner(master, "manage.up", vec![]).await?;
    let mut minions: Vec<String> = match response.returns.first() {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(Value::Null) | None => vec![],
        Some(other) => {
            return Err(Error::Malformed(format!(
                "expected manage.up to return a list, got {other}"
            )))
        }
    };
    minions.sort();
    Ok(minions)
}
