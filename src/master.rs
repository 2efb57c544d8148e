//! A session with a Salt master's REST API.
//!
//! [Master] owns the credentials and the auth token. It logs in lazily, attaches the token to
//! every command, and logs in again once the token is about to expire. It never retries a failed
//! request: that decision belongs to the caller.

use crate::config::Config;
use crate::core::Command;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::{Error, Result};
use crate::http::{HttpInterface, HttpResponse};
use crate::response::SaltResponse;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// Header that carries the auth token on command requests.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// A token that expires within this many seconds is treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// A token issued by `/login`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    token: String,
    expires: Option<DateTime<Utc>>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>, expires: Option<DateTime<Utc>>) -> Self {
        AuthToken {
            token: token.into(),
            expires,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    /// Whether the token should be replaced before use at time `now`.
    ///
    /// Tokens without an expiry never expire on our side; the master will say so with a 401.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires {
            Some(expires) => expires - Duration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => false,
        }
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<redacted>")
            .field("expires", &self.expires)
            .finish()
    }
}

// The single entry in a `/login` reply. Only the fields we use are read.
#[derive(Debug, Deserialize)]
struct LoginReturn {
    #[serde(default)]
    token: String,

    // Seconds since the epoch, as a float.
    #[serde(default)]
    expire: Option<f64>,

    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "return")]
    returns: Vec<LoginReturn>,
}

/// A session with one Salt master.
pub struct Master<H: HttpInterface> {
    url: String,
    credentials: Credentials,
    eauth: String,
    http: H,
    token: Option<AuthToken>,
}

impl<H: HttpInterface> Master<H> {
    /// Creates a session for the API at `url`. Does not contact the master.
    pub fn new(
        url: impl Into<String>,
        credentials: Credentials,
        eauth: impl Into<String>,
        http: H,
    ) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Master {
            url,
            credentials,
            eauth: eauth.into(),
            http,
            token: None,
        }
    }

    /// Creates a session from a [Config], looking up its credentials in `store`.
    pub fn from_config(
        config: &Config,
        store: &impl CredentialStore,
        http: H,
    ) -> anyhow::Result<Self> {
        let credentials = store.credentials(&config.credentials)?;
        Ok(Self::new(&config.url, credentials, &config.eauth, http))
    }

    /// The API base URL, without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The current auth token, if logged in.
    pub fn token(&self) -> Option<&AuthToken> {
        self.token.as_ref()
    }

    /// Obtains a fresh auth token, replacing any existing one.
    pub async fn login(&mut self) -> Result<&AuthToken> {
        let url = format!("{}/login", self.url);
        info!(
            url = %url,
            user = %self.credentials.username,
            eauth = %self.eauth,
            "logging in to Salt API"
        );

        let body = json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
            "eauth": self.eauth,
        });
        let response = self.http.post_json(&url, &[], &body).await?;

        if response.status == 401 {
            return Err(self.auth_error("invalid credentials (HTTP 401)"));
        }
        let response = success_body(response)?;
        let parsed: LoginResponse = serde_json::from_str(&response)
            .map_err(|err| Error::Malformed(format!("{err}: {response}")))?;

        let login = match parsed.returns.into_iter().next() {
            Some(login) if !login.token.is_empty() => login,
            _ => return Err(self.auth_error("no token in login response")),
        };
        let expires = login
            .expire
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
        debug!(user = ?login.user, expires = ?expires, "received Salt API token");

        Ok(&*self.token.insert(AuthToken::new(login.token, expires)))
    }

    /// Sends `command` to the master and returns its reply.
    ///
    /// Logs in first if there is no token yet or the token is about to expire.
    pub async fn run(&mut self, command: &Command) -> Result<SaltResponse> {
        let current = self
            .token
            .as_ref()
            .filter(|token| !token.is_expired_at(Utc::now()))
            .map(|token| token.as_str().to_owned());
        let token = match current {
            Some(token) => token,
            None => self.login().await?.as_str().to_owned(),
        };

        let url = format!("{}/", self.url);
        let body = serde_json::to_value(command)
            .map_err(|err| Error::Malformed(format!("failed to serialize command: {err}")))?;
        info!(command = %command.title(), "dispatching Salt command");
        debug!(payload = %body, "Salt API request");

        let response = self
            .http
            .post_json(&url, &[(AUTH_HEADER, token.as_str())], &body)
            .await?;

        if response.status == 401 {
            warn!("Salt API rejected the auth token; dropping it");
            self.token = None;
            return Err(Error::Unauthorized);
        }
        let body = success_body(response)?;
        SaltResponse::from_body(&body)
    }

    fn auth_error(&self, reason: &str) -> Error {
        Error::Auth {
            url: self.url.clone(),
            reason: reason.to_owned(),
        }
    }
}

// Returns the body of a 2xx response, or an Error::Http for anything else.
fn success_body(response: HttpResponse) -> Result<String> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(Error::Http {
            status: response.status,
            body: response.body,
        })
    }
}
