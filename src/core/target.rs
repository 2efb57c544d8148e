//! Minion targeting.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// How the master interprets a target expression. Sent to the API as `expr_form`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprForm {
    #[default]
    Glob,
    Pcre,
    List,
    Grain,
    GrainPcre,
    Pillar,
    PillarPcre,
    Nodegroup,
    Range,
    Compound,
    Ipcidr,
}

impl ExprForm {
    /// Every variant, in declaration order.
    pub const ALL: [ExprForm; 11] = [
        ExprForm::Glob,
        ExprForm::Pcre,
        ExprForm::List,
        ExprForm::Grain,
        ExprForm::GrainPcre,
        ExprForm::Pillar,
        ExprForm::PillarPcre,
        ExprForm::Nodegroup,
        ExprForm::Range,
        ExprForm::Compound,
        ExprForm::Ipcidr,
    ];

    /// The name the Salt API uses for this targeting type.
    pub fn as_str(&self) -> &'static str {
        use ExprForm::*;
        match self {
            Glob => "glob",
            Pcre => "pcre",
            List => "list",
            Grain => "grain",
            GrainPcre => "grain_pcre",
            Pillar => "pillar",
            PillarPcre => "pillar_pcre",
            Nodegroup => "nodegroup",
            Range => "range",
            Compound => "compound",
            Ipcidr => "ipcidr",
        }
    }
}

impl Display for ExprForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExprForm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match ExprForm::ALL.iter().find(|form| form.as_str() == s) {
            Some(form) => Ok(*form),
            None => bail!(
                "unknown expr_form {s:?}; expected one of: {}",
                ExprForm::ALL.map(|form| form.as_str()).join(", "),
            ),
        }
    }
}

/// A set of minions, described by an expression and the way to interpret it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Target {
    pub expression: String,
    pub expr_form: ExprForm,
}

impl Target {
    pub fn new(expression: impl Into<String>, expr_form: ExprForm) -> Self {
        Target {
            expression: expression.into(),
            expr_form,
        }
    }

    /// A shell-style glob over minion IDs, e.g. `ctl*`.
    pub fn glob(expression: impl Into<String>) -> Self {
        Self::new(expression, ExprForm::Glob)
    }

    /// A compound matcher, e.g. `I@nginx:server and not ctl01*`.
    pub fn compound(expression: impl Into<String>) -> Self {
        Self::new(expression, ExprForm::Compound)
    }

    /// An explicit list of minion IDs.
    pub fn list<S: AsRef<str>>(minions: &[S]) -> Self {
        let joined = minions
            .iter()
            .map(|m| m.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        Self::new(joined, ExprForm::List)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.expression, self.expr_form)
    }
}
