//! Interprets what the Salt API sends back.
//!
//! Every Salt API reply has the shape `{"return": [entry, ...]}`. For targeted commands each entry
//! maps minion IDs to whatever the minion returned. For state runs, that is a map of state keys to
//! [StateResult]s:
//!
//! ```text
//! {"return": [{"ctl01": {"pkg_|-nginx_|-nginx_|-installed": {"result": true, "changes": {}, ...}}}]}
//! ```
//!
//! [SaltResponse] keeps the raw structure. The helpers here read it on demand, so commands whose
//! output has no fixed shape (grains, pillar, runners) pass through untouched.

use crate::error::{Error, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// A reply from the Salt API.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SaltResponse {
    #[serde(rename = "return")]
    pub returns: Vec<Value>,
}

impl SaltResponse {
    /// Parses a response body.
    pub fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|err| Error::Malformed(format!("{err}: {body}")))
    }

    /// Yields `(node, value)` for every key of every object entry, in response order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.returns
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|entry| entry.iter().map(|(node, value)| (node.as_str(), value)))
    }

    /// Whether the master returned nothing useful, e.g. because the target matched no minions.
    pub fn is_empty(&self) -> bool {
        self.returns.iter().all(|entry| match entry {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(list) => list.is_empty(),
            _ => false,
        })
    }

    /// Interprets each node's return as the outcome of a state run.
    pub fn state_outcomes(&self) -> Vec<(&str, StateOutcome)> {
        self.nodes()
            .map(|(node, value)| (node, StateOutcome::from_value(value)))
            .collect()
    }

    /// Collects every failed state, and every node that returned something other than states.
    pub fn failures(&self) -> Vec<Failure> {
        let mut failures = Vec::new();
        for (node, outcome) in self.state_outcomes() {
            match outcome {
                StateOutcome::States(states) => {
                    failures.extend(
                        states
                            .iter()
                            .filter(|(_, state)| state.status() == Status::Failed)
                            .map(|(key, state)| Failure {
                                node: node.to_owned(),
                                state: Some(StateKey::title_of(key)),
                                comment: state.comment.clone(),
                            }),
                    );
                }
                StateOutcome::Errors(errors) => failures.push(Failure {
                    node: node.to_owned(),
                    state: None,
                    comment: errors.join("\n"),
                }),
                StateOutcome::Other(value) => failures.push(Failure {
                    node: node.to_owned(),
                    state: None,
                    comment: format!("unexpected state return: {value}"),
                }),
            }
        }
        failures
    }

    /// Decides whether a state run succeeded everywhere.
    ///
    /// # Errors
    ///
    /// Returns [Error::EmptyResponse] if no node returned anything, or [Error::StateFailed] with
    /// every [Failure] if any state failed.
    pub fn check(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyResponse);
        }
        let failures = self.failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::StateFailed(failures))
        }
    }

    /// Minions that answered a `test.ping` with `true`, sorted.
    pub fn responding_minions(&self) -> Vec<String> {
        let mut minions: Vec<_> = self
            .nodes()
            .filter(|(_, value)| value.as_bool() == Some(true))
            .map(|(node, _)| node.to_owned())
            .collect();
        minions.sort();
        minions
    }
}

/// One failed state, or one node whose state run failed outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub node: String,

    /// Title of the failed state, if the failure belongs to a single state.
    pub state: Option<String>,

    pub comment: String,
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Some(state) => write!(f, "[{}] {state}: {}", self.node, self.comment),
            None => write!(f, "[{}] {}", self.node, self.comment),
        }
    }
}

/// What a single node returned for a state run.
#[derive(Clone, Debug, PartialEq)]
pub enum StateOutcome {
    /// State results keyed by state key, ordered by `__run_num__`.
    States(Vec<(String, StateResult)>),

    /// The minion could not run the states at all, e.g. because of a render error or a missing
    /// SLS. Salt reports these as a list of strings (or a single string) instead of a state map.
    Errors(Vec<String>),

    /// Anything else, e.g. `false` from a minion that did not respond.
    Other(Value),
}

impl StateOutcome {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) if !map.is_empty() => match Self::states(map) {
                Some(states) => StateOutcome::States(states),
                None => StateOutcome::Other(value.clone()),
            },
            Value::String(error) => StateOutcome::Errors(vec![error.clone()]),
            Value::Array(list) if list.iter().all(Value::is_string) => StateOutcome::Errors(
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect(),
            ),
            other => StateOutcome::Other(other.clone()),
        }
    }

    // Reads every entry of a state map on its own. An entry that isn't a valid state result is
    // kept as a failed state so the rest of the node still gets reported. Returns None if no
    // entry is a state result, i.e. the map is something else entirely.
    fn states(map: &serde_json::Map<String, Value>) -> Option<Vec<(String, StateResult)>> {
        let mut any_valid = false;
        let mut states: Vec<_> = map
            .iter()
            .map(|(key, value)| {
                let state = match StateResult::deserialize(value) {
                    Ok(state) => {
                        any_valid = true;
                        state
                    }
                    Err(err) => StateResult::unreadable(value, &err),
                };
                (key.clone(), state)
            })
            .collect();
        if !any_valid {
            return None;
        }

        // Stable sort, so states without a run number keep response order.
        states.sort_by_key(|(_, state)| state.run_num.unwrap_or(u64::MAX));
        Some(states)
    }
}

/// The result of one state on one node.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StateResult {
    /// `true` on success, `false` on failure, `null` when a test run would make changes.
    pub result: Option<bool>,

    #[serde(default)]
    pub changes: Value,

    #[serde(default, deserialize_with = "string_or_lines")]
    pub comment: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Milliseconds.
    #[serde(default, deserialize_with = "milliseconds")]
    pub duration: Option<f64>,

    #[serde(default, rename = "__run_num__")]
    pub run_num: Option<u64>,

    #[serde(default, rename = "__sls__")]
    pub sls: Option<String>,

    #[serde(default, rename = "__id__")]
    pub id: Option<String>,
}

/// How a [StateResult] should be counted and displayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Unchanged,
    Changed,

    /// Test mode: the state would have made changes.
    Pending,

    Failed,
}

impl StateResult {
    // A failed stand-in for a state entry that could not be read.
    fn unreadable(value: &Value, err: &serde_json::Error) -> Self {
        StateResult {
            result: Some(false),
            comment: format!("unreadable state result ({err}): {value}"),
            run_num: value.get("__run_num__").and_then(Value::as_u64),
            ..StateResult::default()
        }
    }

    pub fn status(&self) -> Status {
        match self.result {
            Some(false) => Status::Failed,
            None => Status::Pending,
            Some(true) if has_changes(&self.changes) => Status::Changed,
            Some(true) => Status::Unchanged,
        }
    }
}

/// Whether a `changes` value actually carries changes.
pub fn has_changes(changes: &Value) -> bool {
    match changes {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

// Salt sends comments as a string most of the time, but some states return a list of lines.
fn string_or_lines<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Array(lines) => Ok(lines
            .iter()
            .map(|line| match line {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")),
        other => Err(de::Error::custom(format!(
            "expected comment to be a string or list, got {other}"
        ))),
    }
}

// Newer minions report durations as a number; older ones send strings like "31.2 ms".
fn milliseconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim_end_matches("ms").trim().parse().ok(),
        _ => None,
    })
}

/// The parts of a state key such as `file_|-nginx_conf_|-/etc/nginx/nginx.conf_|-managed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateKey<'k> {
    pub module: &'k str,
    pub id: &'k str,
    pub name: &'k str,
    pub function: &'k str,
}

impl<'k> StateKey<'k> {
    const SEPARATOR: &'static str = "_|-";

    /// Splits a state key into its four parts. Returns [None] if `key` isn't a state key.
    ///
    /// If the ID or name contains the separator itself, the split between them is a guess.
    pub fn parse(key: &'k str) -> Option<Self> {
        let (module, rest) = key.split_once(Self::SEPARATOR)?;
        let (middle, function) = rest.rsplit_once(Self::SEPARATOR)?;
        let splits: Vec<_> = middle.match_indices(Self::SEPARATOR).map(|(i, _)| i).collect();
        if splits.is_empty() {
            return None;
        }
        let at = splits[(splits.len() - 1) / 2];
        let id = &middle[..at];
        let name = &middle[at + Self::SEPARATOR.len()..];
        Some(StateKey {
            module,
            id,
            name,
            function,
        })
    }

    /// A one-line title, e.g. `pkg.installed: nginx`. Falls back to the raw key.
    pub fn title_of(key: &str) -> String {
        match StateKey::parse(key) {
            Some(parsed) => parsed.to_string(),
            None => key.to_owned(),
        }
    }
}

impl Display for StateKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.module, self.function, self.name)
    }
}


#[cfg(test)]
pub mod fixtures {
    use super::*;
    use serde_json::json;

    /// A state run on two nodes: ctl01 installs nginx and changes its config, ctl02 fails to
    /// start the service. States are listed out of run order on purpose.
    pub fn mixed_state_run() -> SaltResponse {
        serde_json::from_value(json!({
            "return": [{
                "ctl01": {
                    "file_|-nginx_conf_|-/etc/nginx/nginx.conf_|-managed": {
                        "result": true,
                        "changes": {"diff": "--- \n+++ \n@@ -1 +1 @@\n-worker_processes 1;\n+worker_processes 4;\n"},
                        "comment": "File /etc/nginx/nginx.conf updated",
                        "name": "/etc/nginx/nginx.conf",
                        "duration": 31.2,
                        "__run_num__": 1,
                        "__sls__": "nginx.server",
                        "__id__": "nginx_conf",
                    },
                    "pkg_|-nginx_packages_|-nginx_|-installed": {
                        "result": true,
                        "changes": {},
                        "comment": "All specified packages are already installed",
                        "name": "nginx",
                        "duration": 812.5,
                        "__run_num__": 0,
                        "__sls__": "nginx.server",
                        "__id__": "nginx_packages",
                    },
                },
                "ctl02": {
                    "pkg_|-nginx_packages_|-nginx_|-installed": {
                        "result": true,
                        "changes": {},
                        "comment": "All specified packages are already installed",
                        "name": "nginx",
                        "__run_num__": 0,
                    },
                    "service_|-nginx_service_|-nginx_|-running": {
                        "result": false,
                        "changes": {},
                        "comment": ["Job for nginx.service failed.", "See journalctl -xe."],
                        "name": "nginx",
                        "__run_num__": 1,
                    },
                },
            }]
        }))
        .unwrap()
    }

    /// A state run in which every state succeeded without changes.
    pub fn clean_state_run() -> SaltResponse {
        serde_json::from_value(json!({
            "return": [{
                "cfg01": {
                    "pkg_|-salt_master_packages_|-salt-master_|-installed": {
                        "result": true,
                        "changes": {},
                        "comment": "All specified packages are already installed",
                        "__run_num__": 0,
                    },
                },
            }]
        }))
        .unwrap()
    }

    /// A node that could not render its states.
    pub fn missing_sls() -> SaltResponse {
        serde_json::from_value(json!({
            "return": [{
                "cmp001": ["No matching sls found for 'nginx' in env 'base'"],
            }]
        }))
        .unwrap()
    }
}
