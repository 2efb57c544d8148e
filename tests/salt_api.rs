//! Drives saltcall from login through a highstate run to the printed report, against a scripted
//! salt-api that answers the way a real master does.
//!
//! The fake master checks credentials and the auth token itself, so these tests catch protocol
//! mistakes (a missing header, a wrong login body) that unit tests with canned replies would not.

use async_trait::async_trait;
use saltcall::core::Target;
use saltcall::http::{HttpInterface, HttpResponse};
use saltcall::report::_state_result;
use saltcall::steps::{self, StateOptions};
use saltcall::{Credentials, Error, Master};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const TOKEN: &str = "6b94ad1b0a4ecbe6d5d8a3e5b3a8ef7b9b1f6fb2";

pub mod api {
    use super::*;

    #[derive(Debug, Default)]
    struct State {
        logins: usize,
        commands: Vec<Value>,
    }

    /// A tiny salt-api. Accepts `jenkins`/`hunter2` over PAM and answers every command with the
    /// reply for its function name.
    #[derive(Clone, Debug, Default)]
    pub struct FakeSaltApi {
        state: Arc<Mutex<State>>,
        replies: Arc<Mutex<Vec<(&'static str, Value)>>>,
    }

    impl FakeSaltApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answers commands running `fun` with `reply`.
        pub fn on(self, fun: &'static str, reply: Value) -> Self {
            self.replies.lock().unwrap().push((fun, reply));
            self
        }

        pub fn logins(&self) -> usize {
            self.state.lock().unwrap().logins
        }

        pub fn commands(&self) -> Vec<Value> {
            self.state.lock().unwrap().commands.clone()
        }

        fn login(&self, body: &Value) -> HttpResponse {
            let valid = body["username"] == "jenkins"
                && body["password"] == "hunter2"
                && body["eauth"] == "pam";
            if !valid {
                return HttpResponse::new(401, "<html>401 Unauthorized</html>");
            }
            self.state.lock().unwrap().logins += 1;
            let expire = chrono::Utc::now().timestamp() as f64 + 43200.0;
            let reply = json!({"return": [{
                "token": TOKEN,
                "expire": expire,
                "start": expire - 43200.0,
                "user": "jenkins",
                "eauth": "pam",
                "perms": [".*", "@runner"],
            }]});
            HttpResponse::new(200, reply.to_string())
        }

        fn command(&self, headers: &[(&str, &str)], body: &Value) -> HttpResponse {
            let authorized = headers
                .iter()
                .any(|(name, value)| *name == "X-Auth-Token" && *value == TOKEN);
            if !authorized {
                return HttpResponse::new(401, "<html>401 Unauthorized</html>");
            }
            self.state.lock().unwrap().commands.push(body.clone());

            let replies = self.replies.lock().unwrap();
            match replies.iter().find(|(fun, _)| body["fun"] == *fun) {
                Some((_, reply)) => HttpResponse::new(200, reply.to_string()),
                None => HttpResponse::new(500, "no reply scripted"),
            }
        }
    }

    #[async_trait]
    impl HttpInterface for FakeSaltApi {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&str, &str)],
            body: &Value,
        ) -> anyhow::Result<HttpResponse> {
            match url.strip_prefix("https://cfg01.mk22.local:6969") {
                Some("/login") => Ok(self.login(body)),
                Some("/") => Ok(self.command(headers, body)),
                _ => anyhow::bail!("connection refused: {url}"),
            }
        }
    }
}
use api::FakeSaltApi;

fn master(api: &FakeSaltApi, password: &str) -> Master<FakeSaltApi> {
    Master::new(
        "https://cfg01.mk22.local:6969/",
        Credentials::new("jenkins", password),
        "pam",
        api.clone(),
    )
}

// A trimmed highstate from two OpenStack controllers. ctl03 fails to start keystone.
fn highstate() -> Value {
    json!({"return": [{
        "ctl01.mk22.local": {
            "pkg_|-keystone_packages_|-keystone_packages_|-installed": {
                "result": true,
                "changes": {},
                "comment": "All specified packages are already installed",
                "name": "keystone",
                "duration": 612.4,
                "__run_num__": 0,
                "__sls__": "keystone.server",
                "__id__": "keystone_packages",
            },
            "file_|-/etc/keystone/keystone.conf_|-/etc/keystone/keystone.conf_|-managed": {
                "result": true,
                "changes": {"diff": "--- \n+++ \n@@ -1 +1 @@\n-debug = true\n+debug = false\n"},
                "comment": "File /etc/keystone/keystone.conf updated",
                "name": "/etc/keystone/keystone.conf",
                "duration": "41.07 ms",
                "__run_num__": 1,
                "__sls__": "keystone.server",
                "__id__": "/etc/keystone/keystone.conf",
            },
        },
        "ctl03.mk22.local": {
            "pkg_|-keystone_packages_|-keystone_packages_|-installed": {
                "result": true,
                "changes": {},
                "comment": "All specified packages are already installed",
                "name": "keystone",
                "__run_num__": 0,
            },
            "service_|-keystone_service_|-apache2_|-running": {
                "result": false,
                "changes": {},
                "comment": "Service apache2 failed to start",
                "name": "apache2",
                "__run_num__": 1,
            },
        },
    }]})
}

fn report(response: &saltcall::SaltResponse, only_changes: bool) -> (String, String) {
    let mut stdout = vec![];
    let mut stderr = vec![];
    _state_result(&mut stdout, &mut stderr, response, only_changes).unwrap();
    (
        String::from_utf8(stdout).unwrap(),
        String::from_utf8(stderr).unwrap(),
    )
}

#[tokio::test]
async fn logs_in_once_for_several_commands() {
    let api = FakeSaltApi::new()
        .on("test.ping", json!({"return": [{"ctl01.mk22.local": true}]}))
        .on("grains.item", json!({"return": [{"ctl01.mk22.local": {"os": "Ubuntu"}}]}));
    let mut master = master(&api, "hunter2");
    let target = Target::glob("ctl*");

    let minions = steps::ping(&mut master, &target).await.unwrap();
    steps::get_grain(&mut master, &target, "os").await.unwrap();

    assert_eq!(vec!["ctl01.mk22.local"], minions);
    assert_eq!(1, api.logins());
    assert_eq!(2, api.commands().len());
}

#[tokio::test]
async fn bad_password_is_an_auth_error() {
    let api = FakeSaltApi::new();
    let mut master = master(&api, "wrong");

    match steps::ping(&mut master, &Target::glob("*")).await {
        Err(Error::Auth { url, .. }) => assert_eq!("https://cfg01.mk22.local:6969", url),
        x => panic!("expected Auth but got:\n{x:#?}"),
    }
    assert!(api.commands().is_empty());
}

#[tokio::test]
async fn failed_highstate_is_reported_and_returned() {
    let api = FakeSaltApi::new().on("state.highstate", highstate());
    let mut master = master(&api, "hunter2");
    let target = Target::compound("I@keystone:server");

    let err = steps::enforce_highstate(&mut master, &target, &StateOptions::default())
        .await
        .unwrap_err();

    match &err {
        Error::StateFailed(failures) => {
            assert_eq!(1, failures.len());
            assert_eq!("ctl03.mk22.local", failures[0].node);
            assert_eq!("Service apache2 failed to start", failures[0].comment);
        }
        x => panic!("expected StateFailed but got:\n{x:#?}"),
    }
    assert_eq!(
        "1 Salt state failed:\n    \
        [ctl03.mk22.local] service.running: apache2: Service apache2 failed to start",
        err.to_string(),
    );
    assert_eq!(
        json!({
            "client": "local",
            "tgt": "I@keystone:server",
            "expr_form": "compound",
            "fun": "state.highstate",
        }),
        api.commands()[0],
    );
}

#[tokio::test]
async fn only_changes_report() {
    let api = FakeSaltApi::new().on("state.highstate", highstate());
    let mut master = master(&api, "hunter2");
    let options = StateOptions {
        fail_on_error: false,
        ..StateOptions::default()
    };

    let response = steps::enforce_highstate(&mut master, &Target::glob("ctl*"), &options)
        .await
        .unwrap();
    let (stdout, stderr) = report(&response, true);

    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(
        "[ctl01.mk22.local] Changed   file.managed: /etc/keystone/keystone.conf",
        lines[0],
    );
    assert_eq!("    Changes:", lines[1]);
    assert!(lines[2].starts_with("        diff:"));
    assert!(stdout.contains("debug = false"));
    assert!(!stdout.contains("pkg.installed"));
    assert_eq!(
        &[
            "[ctl01.mk22.local] Summary: 2 succeeded (1 changed), 0 pending, 0 failed",
            "[ctl03.mk22.local] Summary: 1 succeeded (0 changed), 0 pending, 1 failed",
        ],
        &lines[lines.len() - 2..],
    );
    assert_eq!(
        "[ctl03.mk22.local] Failed    service.running: apache2\n    \
        Comment:\n        \
        Service apache2 failed to start\n",
        stderr,
    );
}
