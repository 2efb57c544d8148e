//! Locates and loads saltcall's configuration.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// The name of the configuration file within a configuration directory.
pub const CONFIG_FILE: &str = "saltcall.yaml";

/// The name of the credentials file within a configuration directory.
pub const CREDENTIALS_FILE: &str = "credentials.yaml";

/// Returns a [PathBuf] to the directory where saltcall's system-wide configuration should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/saltcall`.
/// Otherwise, it returns `/etc/saltcall`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/saltcall";

    let mut path = PathBuf::new();

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }
    #[cfg(not(test))]
    path.push("/");

    path.push(CONFIG_DIR);
    path
}

/// Returns `~/.config/saltcall`, or [None] if the home directory is unknown.
pub fn user_config_dir() -> Option<PathBuf> {
    home::home_dir().map(|mut path| {
        path.push(".config");
        path.push("saltcall");
        path
    })
}

/// Where to find the Salt API and how to log in to it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL of the Salt API, e.g. `https://cfg01:6969`.
    pub url: String,

    /// ID of the entry in the credential store that holds the API user's credentials.
    #[serde(default = "default_credentials")]
    pub credentials: String,

    /// External authentication backend, e.g. `pam` or `ldap`.
    #[serde(default = "default_eauth")]
    pub eauth: String,

    /// Set to `false` to accept self-signed certificates.
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Request timeout. No timeout if unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_credentials() -> String {
    "salt".to_string()
}

fn default_eauth() -> String {
    "pam".to_string()
}

fn default_verify_tls() -> bool {
    true
}

impl Config {
    /// A configuration with defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        Config {
            url: url.into(),
            credentials: default_credentials(),
            eauth: default_eauth(),
            verify_tls: default_verify_tls(),
            timeout_secs: None,
        }
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        if config.url.trim().is_empty() {
            bail!("config file has an empty url: {}", path.display());
        }
        Ok(config)
    }

    /// Builds the configuration to run with: the file at `path` if there is one, otherwise just
    /// the URL from `overrides`. Any setting in `overrides` replaces the file's.
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut config = match (path, &overrides.url) {
            (Some(path), _) => Config::load(path)?,
            (None, Some(url)) => Config::new(url),
            (None, None) => bail!(
                "no configuration file found and no URL given; create {} or pass a URL",
                config_dir().join(CONFIG_FILE).display(),
            ),
        };

        if let Some(url) = &overrides.url {
            config.url = url.clone();
        }
        if let Some(credentials) = &overrides.credentials {
            config.credentials = credentials.clone();
        }
        if let Some(eauth) = &overrides.eauth {
            config.eauth = eauth.clone();
        }
        Ok(config)
    }

    /// Returns the first configuration file that exists, checking the user's directory before the
    /// system-wide one.
    pub fn find() -> Option<PathBuf> {
        user_config_dir()
            .into_iter()
            .chain(std::iter::once(config_dir()))
            .map(|mut dir| {
                dir.push(CONFIG_FILE);
                dir
            })
            .find(|path| path.is_file())
    }
}

/// Settings given on the command line, which win over the configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub url: Option<String>,
    pub credentials: Option<String>,
    pub eauth: Option<String>,
}

/// Returns the credentials file that belongs with the configuration file at `config_path`: the
/// one in the same directory, or the system-wide one if there is no configuration file.
pub fn credentials_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(config_dir)
        .join(CREDENTIALS_FILE)
}
