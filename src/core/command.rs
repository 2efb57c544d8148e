//! Types for representing a single call to the Salt API.

use crate::core::target::{ExprForm, Target};
use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::str::FromStr;

/// The Salt API client interface that executes a [Command].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Runs an execution module on minions and waits for their returns.
    #[default]
    Local,

    /// Publishes to minions and returns the job ID immediately.
    LocalAsync,

    /// Like [ClientKind::Local], but the master rolls the command out in batches.
    LocalBatch,

    /// Runs a runner module on the master itself.
    Runner,

    /// Runs a wheel module on the master itself, e.g. key management.
    Wheel,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        use ClientKind::*;
        match self {
            Local => "local",
            LocalAsync => "local_async",
            LocalBatch => "local_batch",
            Runner => "runner",
            Wheel => "wheel",
        }
    }

    /// Every variant, in declaration order.
    pub const ALL: [ClientKind; 5] = [
        ClientKind::Local,
        ClientKind::LocalAsync,
        ClientKind::LocalBatch,
        ClientKind::Runner,
        ClientKind::Wheel,
    ];

    /// Whether this client publishes to minions and so needs a target.
    pub fn is_targeted(&self) -> bool {
        matches!(
            self,
            ClientKind::Local | ClientKind::LocalAsync | ClientKind::LocalBatch
        )
    }
}

impl Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match ClientKind::ALL.iter().find(|client| client.as_str() == s) {
            Some(client) => Ok(*client),
            None => bail!(
                "unknown client {s:?}; expected one of: {}",
                ClientKind::ALL.map(|client| client.as_str()).join(", "),
            ),
        }
    }
}

/// One request to the Salt API.
///
/// # Serialization
///
/// A [Command] serializes to exactly the JSON body the Salt API expects:
///
/// ```text
/// {"client": ..., "tgt": ..., "expr_form": ..., "fun": ..., "arg": [...], "kwarg": {...}, "batch": ...}
/// ```
///
/// `tgt` and `expr_form` are left out for master-side clients that have no target, and `arg`,
/// `kwarg`, and `batch` are left out when they carry nothing. A batched `local` command goes out
/// through the `local_batch` client, the only one that honors `batch`.
///
/// ```
/// # use saltcall::core::{Command, Target};
/// let command = Command::local(Target::glob("ctl*"), "cmd.shell")
///     .arg("uptime")
///     .batch("25%");
///
/// assert_eq!(
///     serde_json::json!({
///         "client": "local_batch",
///         "tgt": "ctl*",
///         "expr_form": "glob",
///         "fun": "cmd.shell",
///         "arg": ["uptime"],
///         "batch": "25%",
///     }),
///     serde_json::to_value(&command).unwrap(),
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Command {
    client: ClientKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tgt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    expr_form: Option<ExprForm>,

    fun: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    arg: Vec<Value>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    kwarg: IndexMap<String, Value>,

    // Passed through untouched; the master decides what "10" or "25%" means.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch: Option<String>,
}

impl Command {
    /// Creates a [Command] for any client. `target` may be `None` for master-side clients.
    pub fn new(client: ClientKind, target: Option<Target>, fun: impl Into<String>) -> Self {
        let (tgt, expr_form) = match target {
            Some(Target {
                expression,
                expr_form,
            }) => (Some(expression), Some(expr_form)),
            None => (None, None),
        };

        Command {
            client,
            tgt,
            expr_form,
            fun: fun.into(),
            arg: Vec::new(),
            kwarg: IndexMap::new(),
            batch: None,
        }
    }

    /// Like [Command::new], but rejects a targeted client without a target.
    pub fn try_new(
        client: ClientKind,
        target: Option<Target>,
        fun: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let fun = fun.into();
        if client.is_targeted() && target.is_none() {
            bail!("{fun} needs a target with the {client} client");
        }
        Ok(Self::new(client, target, fun))
    }

    /// Runs execution module function `fun` on the minions matched by `target`.
    pub fn local(target: Target, fun: impl Into<String>) -> Self {
        Self::new(ClientKind::Local, Some(target), fun)
    }

    /// Runs runner function `fun` on the master.
    pub fn runner(fun: impl Into<String>) -> Self {
        Self::new(ClientKind::Runner, None, fun)
    }

    /// Runs wheel function `fun` on the master.
    pub fn wheel(fun: impl Into<String>) -> Self {
        Self::new(ClientKind::Wheel, None, fun)
    }

    /// Appends a positional argument.
    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.arg.push(arg.into());
        self
    }

    /// Appends several positional arguments.
    pub fn args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.arg.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets a keyword argument, replacing any earlier value for `key`.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwarg.insert(key.into(), value.into());
        self
    }

    /// Asks the master to roll the command out in batches, e.g. `"10"` minions or `"25%"`.
    ///
    /// The `local` client ignores `batch`, so a `local` command switches to `local_batch`.
    pub fn batch(mut self, batch: impl Into<String>) -> Self {
        if self.client == ClientKind::Local {
            self.client = ClientKind::LocalBatch;
        }
        self.batch = Some(batch.into());
        self
    }

    pub fn client(&self) -> ClientKind {
        self.client
    }

    /// The target, if this command has one.
    pub fn target(&self) -> Option<Target> {
        match (&self.tgt, self.expr_form) {
            (Some(tgt), Some(expr_form)) => Some(Target::new(tgt.clone(), expr_form)),
            _ => None,
        }
    }

    pub fn fun(&self) -> &str {
        &self.fun
    }

    pub fn args_list(&self) -> &[Value] {
        &self.arg
    }

    pub fn kwargs(&self) -> &IndexMap<String, Value> {
        &self.kwarg
    }

    pub fn batch_size(&self) -> Option<&str> {
        self.batch.as_deref()
    }

    /// Generates a one-line identifier for the command, suitable for log lines and user output.
    pub fn title(&self) -> String {
        match self.target() {
            Some(target) => format!("{} on {target}", self.fun),
            None => format!("{} ({})", self.fun, self.client),
        }
    }
}

/// Parses a command-line argument value as YAML, so `10` is a number, `true` a bool, and
/// `{a: 1}` a map. Anything else is a string.
pub fn parse_value(s: &str) -> anyhow::Result<Value> {
    serde_yaml::from_str(s).with_context(|| format!("not valid YAML: {s}"))
}

/// Parses `key=value` into a keyword argument. Only the first `=` separates the two.
pub fn parse_kwarg(s: &str) -> anyhow::Result<(String, Value)> {
    let Some((key, value)) = s.split_once('=') else {
        bail!("expected key=value, got {s:?}");
    };
    if key.is_empty() {
        bail!("missing keyword in {s:?}");
    }
    Ok((key.to_owned(), parse_value(value)?))
}
