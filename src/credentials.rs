//! Looks up the username and password used to log in to the Salt API.

use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A Salt API user.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keeps passwords out of logs and panic messages.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Somewhere credentials can be looked up by ID.
pub trait CredentialStore {
    /// Returns the credentials stored under `id`.
    fn credentials(&self, id: &str) -> anyhow::Result<Credentials>;
}

/// Credentials loaded from a YAML file mapping IDs to `{username, password}`:
///
/// ```yaml
/// salt:
///   username: jenkins
///   password: hunter2
/// ```
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    source: PathBuf,
    entries: IndexMap<String, Credentials>,
}

impl FileCredentialStore {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open credentials file: {}", path.display()))?;
        let entries = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse credentials file: {}", path.display()))?;
        Ok(FileCredentialStore {
            source: path.to_owned(),
            entries,
        })
    }

    /// The IDs in this store, in file order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl CredentialStore for FileCredentialStore {
    fn credentials(&self, id: &str) -> anyhow::Result<Credentials> {
        self.entries.get(id).cloned().ok_or_else(|| {
            anyhow!(
                "no credentials with ID {id:?} in {}",
                self.source.display()
            )
        })
    }
}

/// Credentials read from `SALTCALL_<ID>_USERNAME` and `SALTCALL_<ID>_PASSWORD`.
///
/// See [env_prefix] for how an ID becomes part of a variable name.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn credentials(&self, id: &str) -> anyhow::Result<Credentials> {
        let prefix = env_prefix(id);
        let var = |suffix: &str| {
            let name = format!("{prefix}_{suffix}");
            env::var(&name).with_context(|| format!("environment variable {name} is not set"))
        };
        Ok(Credentials {
            username: var("USERNAME")?,
            password: var("PASSWORD")?,
        })
    }
}

/// Looks up credentials `id` in the environment, then in the credentials file at `path`.
pub fn lookup(id: &str, path: &Path) -> anyhow::Result<Credentials> {
    if let Ok(credentials) = EnvCredentialStore.credentials(id) {
        tracing::debug!(id, "using credentials from the environment");
        return Ok(credentials);
    }

    let prefix = env_prefix(id);
    FileCredentialStore::load(path)
        .and_then(|store| store.credentials(id))
        .with_context(|| {
            format!(
                "no credentials for {id:?}: set {prefix}_USERNAME and {prefix}_PASSWORD or add \
                them to {}",
                path.display(),
            )
        })
}

/// Maps a credentials ID to its environment variable prefix: `salt-qa` becomes `SALTCALL_SALT_QA`.
pub fn env_prefix(id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| match c.is_ascii_alphanumeric() {
            true => c.to_ascii_uppercase(),
            false => '_',
        })
        .collect();
    format!("SALTCALL_{id}")
}
