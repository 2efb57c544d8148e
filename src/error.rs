//! Errors returned when talking to the Salt API or interpreting its results.

use crate::response::Failure;

/// Everything that can go wrong between sending a command to the Salt master and deciding that
/// it succeeded.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The master refused the login, or accepted it without handing back a token.
    #[error("authentication against {url} failed: {reason}")]
    Auth { url: String, reason: String },

    /// The master rejected the auth token on a command request.
    #[error("Salt API rejected the auth token (HTTP 401)")]
    Unauthorized,

    /// Any other non-success HTTP status.
    #[error("Salt API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The body could not be read as a Salt API response.
    #[error("malformed Salt API response: {0}")]
    Malformed(String),

    /// No minion answered, or the master returned nothing at all.
    #[error("Salt API returned an empty response")]
    EmptyResponse,

    /// One or more states failed on one or more nodes.
    #[error("{}", describe_failures(.0))]
    StateFailed(Vec<Failure>),

    /// A shell command did not report success on a node.
    #[error("execution of `{command}` failed on {node}: {output}")]
    CommandFailed {
        node: String,
        command: String,
        output: String,
    },

    /// The HTTP transport itself failed.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

fn describe_failures(failures: &[Failure]) -> String {
    let header = match failures.len() {
        1 => "1 Salt state failed:".to_string(),
        n => format!("{n} Salt states failed:"),
    };
    let lines: Vec<String> = failures
        .iter()
        .map(|failure| format!("\n    {failure}"))
        .collect();
    format!("{header}{}", lines.concat())
}

/// Shorthand for results whose error is [Error].
pub type Result<T> = std::result::Result<T, Error>;
