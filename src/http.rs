//! Provides the HTTP transport that carries requests to the Salt API.
//!
//! [Master] only ever talks to the network through [HttpInterface], so tests (and callers with
//! their own HTTP stack) can swap the transport freely.
//!
//! [Master]: crate::master::Master

use async_trait::async_trait;
use serde_json::Value;

/// A raw HTTP response: status code plus body text. Interpreting the body is the caller's job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The interface that [Master] uses to reach the Salt API.
///
/// [Master]: crate::master::Master
#[async_trait]
pub trait HttpInterface: Send + Sync {
    /// POST `body` as JSON to `url` with the given extra headers.
    ///
    /// Returns `Err` only if the request could not be completed. Non-2xx statuses are returned as
    /// an ordinary [HttpResponse].
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> anyhow::Result<HttpResponse>;
}

#[cfg(feature = "http")]
pub use reqwest_client::ReqwestClient;

#[cfg(feature = "http")]
mod reqwest_client {
    use super::*;
    use crate::config::Config;
    use anyhow::Context;
    use std::time::Duration;

    /// Production implementation of [HttpInterface].
    #[derive(Clone, Debug)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Builds a client honoring the TLS and timeout settings in `config`.
        pub fn from_config(config: &Config) -> anyhow::Result<Self> {
            let mut builder = reqwest::Client::builder();
            if !config.verify_tls {
                builder = builder.danger_accept_invalid_certs(true);
            }
            if let Some(secs) = config.timeout_secs {
                builder = builder.timeout(Duration::from_secs(secs));
            }
            let client = builder.build().context("failed to build HTTP client")?;
            Ok(ReqwestClient { client })
        }
    }

    #[async_trait]
    impl HttpInterface for ReqwestClient {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &Value,
        ) -> anyhow::Result<HttpResponse> {
            let mut request = self
                .client
                .post(url)
                .header("Accept", "application/json")
                .json(body);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("failed to POST to {url}"))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .with_context(|| format!("failed to read response body from {url}"))?;
            Ok(HttpResponse { status, body })
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;
    use anyhow::bail;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    /// One request seen by [TestHttp].
    #[derive(Clone, Debug, PartialEq)]
    pub struct RequestRecord {
        pub url: String,
        pub headers: Vec<(String, String)>,
        pub body: Value,
    }

    impl RequestRecord {
        /// Returns the value of header `name`, if it was sent.
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        }
    }

    #[derive(Debug, Default)]
    struct State {
        // Replies handed out in order, one per request.
        replies: VecDeque<anyhow::Result<HttpResponse>>,

        // Every request received so far.
        requests: Vec<RequestRecord>,
    }

    /// A scripted [HttpInterface]. Hands out queued replies in order and records every request so
    /// tests can examine them later. Clones share the same state.
    #[derive(Clone, Debug, Default)]
    pub struct TestHttp {
        state: Arc<Mutex<State>>,
    }

    impl TestHttp {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap()
        }

        /// Queues a reply with the given status and JSON body.
        pub fn reply(&self, status: u16, body: Value) -> &Self {
            self.state()
                .replies
                .push_back(Ok(HttpResponse::new(status, body.to_string())));
            self
        }

        /// Queues a reply with a raw, possibly non-JSON body.
        pub fn reply_raw(&self, status: u16, body: &str) -> &Self {
            self.state()
                .replies
                .push_back(Ok(HttpResponse::new(status, body)));
            self
        }

        /// Queues a transport failure.
        pub fn fail(&self, message: &'static str) -> &Self {
            self.state()
                .replies
                .push_back(Err(anyhow::anyhow!(message)));
            self
        }

        /// Queues a successful login reply carrying `token`, valid for the next twelve hours.
        pub fn login_ok(&self, token: &str) -> &Self {
            let expire = chrono::Utc::now().timestamp() as f64 + 12.0 * 3600.0;
            self.reply(200, login_body(token, expire))
        }

        pub fn requests(&self) -> Vec<RequestRecord> {
            self.state().requests.clone()
        }
    }

    /// A `/login` response body in the shape salt-api returns.
    pub fn login_body(token: &str, expire: f64) -> Value {
        serde_json::json!({
            "return": [{
                "token": token,
                "expire": expire,
                "start": expire - 43200.0,
                "user": "jenkins",
                "eauth": "pam",
                "perms": [".*", "@runner", "@wheel"],
            }]
        })
    }

    #[async_trait]
    impl HttpInterface for TestHttp {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &Value,
        ) -> anyhow::Result<HttpResponse> {
            let mut state = self.state();
            state.requests.push(RequestRecord {
                url: url.to_owned(),
                headers: headers
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
                body: body.clone(),
            });
            match state.replies.pop_front() {
                Some(reply) => reply,
                None => bail!("TestHttp ran out of scripted replies for {url}"),
            }
        }
    }
}
