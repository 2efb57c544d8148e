use anyhow::bail;
use clap::{ArgAction, Args, Parser, Subcommand};
use saltcall::config::{credentials_path, Overrides};
use saltcall::core::command::{parse_kwarg, parse_value};
use saltcall::core::{ClientKind, Command, ExprForm, Target};
use saltcall::credentials;
use saltcall::http::ReqwestClient;
use saltcall::report::{Report, Reporter};
use saltcall::steps::{self, CmdOptions, StateOptions};
use saltcall::{Config, Master, SaltResponse};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Runs SaltStack commands through salt-api and reports the results.
#[derive(Debug, Parser)]
#[command(name = "saltcall", version)]
struct Cli {
    /// Configuration file. Defaults to ~/.config/saltcall/saltcall.yaml, then
    /// /etc/saltcall/saltcall.yaml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Salt API base URL. Overrides the configuration file.
    #[arg(long, global = true)]
    url: Option<String>,

    /// ID of the API user's credentials. Overrides the configuration file.
    #[arg(long, global = true)]
    credentials: Option<String>,

    /// External authentication backend. Overrides the configuration file.
    #[arg(long, global = true)]
    eauth: Option<String>,

    /// Log more. Repeat for even more. RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Minions to target.
    target: String,

    /// How to interpret the target.
    #[arg(long, default_value = "compound")]
    expr_form: ExprForm,
}

impl TargetArgs {
    fn target(&self) -> Target {
        Target::new(&self.target, self.expr_form)
    }
}

#[derive(Debug, Args)]
struct StateArgs {
    /// Report what would change without changing it.
    #[arg(long)]
    test: bool,

    /// Print only states that changed, failed, or would change.
    #[arg(long)]
    only_changes: bool,

    /// Exit successfully even if states fail.
    #[arg(long)]
    no_fail: bool,

    /// Wait for a running state job instead of failing.
    #[arg(long)]
    queue: bool,

    /// Extra pillar data, as YAML or JSON.
    #[arg(long, value_parser = parse_value)]
    pillar: Option<Value>,

    /// Roll out in batches, e.g. `10` or `25%`.
    #[arg(long)]
    batch: Option<String>,
}

impl StateArgs {
    fn options(&self) -> StateOptions {
        StateOptions {
            test: self.test,
            // Failures are checked after the report is printed.
            fail_on_error: false,
            batch: self.batch.clone(),
            pillar: self.pillar.clone(),
            queue: self.queue,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Action {
    /// List the targeted minions that respond.
    Ping {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run a shell command on the targeted minions.
    Cmd {
        #[command(flatten)]
        target: TargetArgs,

        /// Don't verify that the command succeeded on every minion.
        #[arg(long)]
        no_check: bool,

        /// Roll out in batches, e.g. `10` or `25%`.
        #[arg(long)]
        batch: Option<String>,

        /// The command. Several words are shell-quoted and joined; a single word is sent as-is.
        #[arg(last = true, required = true)]
        words: Vec<String>,
    },

    /// Apply one or more states.
    State {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(required = true)]
        states: Vec<String>,

        #[command(flatten)]
        options: StateArgs,
    },

    /// Apply the highstate.
    Highstate {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        options: StateArgs,
    },

    /// Read a pillar key.
    Pillar {
        #[command(flatten)]
        target: TargetArgs,

        key: String,
    },

    /// Read a grain.
    Grain {
        #[command(flatten)]
        target: TargetArgs,

        grain: String,
    },

    /// Sync custom modules and refresh pillar data.
    Sync {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Run any Salt function.
    Run {
        fun: String,

        /// Minions to target. Required for local clients.
        #[arg(long)]
        target: Option<String>,

        #[arg(long, default_value = "compound")]
        expr_form: ExprForm,

        #[arg(long, default_value = "local")]
        client: ClientKind,

        /// Positional argument, as a YAML scalar or document. Repeatable.
        #[arg(long = "arg", value_parser = parse_value)]
        args: Vec<Value>,

        /// Keyword argument as `key=value`. Repeatable.
        #[arg(long = "kwarg", value_parser = parse_kwarg)]
        kwargs: Vec<(String, Value)>,

        #[arg(long)]
        batch: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,saltcall={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            url: self.url.clone(),
            credentials: self.credentials.clone(),
            eauth: self.eauth.clone(),
        }
    }
}

// Prints a state run, then fails if any state failed unless told not to.
fn finish_states(response: &SaltResponse, options: &StateArgs) -> anyhow::Result<()> {
    Reporter.state_result(response, options.only_changes)?;
    if !options.no_fail {
        response.check()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().or_else(Config::find);
    let config = Config::resolve(config_path.as_deref(), &cli.overrides())?;
    debug!(?config, ?config_path, "loaded configuration");
    let credentials =
        credentials::lookup(&config.credentials, &credentials_path(config_path.as_deref()))?;
    let http = ReqwestClient::from_config(&config)?;
    let mut master = Master::new(&config.url, credentials, &config.eauth, http);

    match cli.action {
        Action::Ping { target } => {
            let minions = steps::ping(&mut master, &target.target()).await?;
            if minions.is_empty() {
                bail!("no minions responded to {}", target.target());
            }
            for minion in minions {
                println!("{minion}");
            }
        }
        Action::Cmd {
            target,
            no_check,
            batch,
            words,
        } => {
            let cmd = steps::shell_command(&words)?;
            let options = CmdOptions {
                check_response: !no_check,
                batch,
            };
            let response = steps::cmd_run(&mut master, &target.target(), &cmd, &options).await?;
            Reporter.command_result(&response)?;
        }
        Action::State {
            target,
            states,
            options,
        } => {
            let response =
                steps::enforce_state(&mut master, &target.target(), &states, &options.options())
                    .await?;
            finish_states(&response, &options)?;
        }
        Action::Highstate { target, options } => {
            let response =
                steps::enforce_highstate(&mut master, &target.target(), &options.options()).await?;
            finish_states(&response, &options)?;
        }
        Action::Pillar { target, key } => {
            let response = steps::get_pillar(&mut master, &target.target(), &key).await?;
            Reporter.command_result(&response)?;
        }
        Action::Grain { target, grain } => {
            let response = steps::get_grain(&mut master, &target.target(), &grain).await?;
            Reporter.command_result(&response)?;
        }
        Action::Sync { target } => {
            let target = target.target();
            let response = steps::sync_all(&mut master, &target).await?;
            Reporter.command_result(&response)?;
            let response = steps::refresh_pillar(&mut master, &target).await?;
            Reporter.command_result(&response)?;
        }
        Action::Run {
            fun,
            target,
            expr_form,
            client,
            args,
            kwargs,
            batch,
        } => {
            let target = target.map(|t| Target::new(t, expr_form));
            let mut command = Command::try_new(client, target, fun)?.args(args);
            for (key, value) in kwargs {
                command = command.kwarg(key, value);
            }
            if let Some(batch) = batch {
                command = command.batch(batch);
            }
            let response = master.run(&command).await?;
            Reporter.command_result(&response)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_args_and_kwargs() {
        let cli = Cli::try_parse_from([
            "saltcall",
            "--url",
            "http://salt:8000",
            "run",
            "state.apply",
            "--target",
            "cfg01*",
            "--expr-form",
            "glob",
            "--arg",
            "linux.system",
            "--kwarg",
            "test=true",
            "--kwarg",
            "pillar={a: 1}",
            "--client",
            "local_async",
        ])
        .unwrap();

        assert_eq!(Some("http://salt:8000".to_string()), cli.overrides().url);
        match cli.action {
            Action::Run {
                fun,
                target,
                expr_form,
                client,
                args,
                kwargs,
                batch,
            } => {
                assert_eq!("state.apply", fun);
                assert_eq!(Some("cfg01*".to_string()), target);
                assert_eq!(ExprForm::Glob, expr_form);
                assert_eq!(ClientKind::LocalAsync, client);
                assert_eq!(vec![json!("linux.system")], args);
                assert_eq!(
                    vec![
                        ("test".to_string(), json!(true)),
                        ("pillar".to_string(), json!({"a": 1})),
                    ],
                    kwargs,
                );
                assert_eq!(None, batch);
            }
            other => panic!("expected run but got:\n{other:#?}"),
        }
    }

    #[test]
    fn kwarg_without_equals_is_rejected() {
        assert!(Cli::try_parse_from(["saltcall", "run", "test.ping", "--kwarg", "oops"]).is_err());
    }

    #[test]
    fn expr_form_defaults_to_compound() {
        let cli = Cli::try_parse_from(["saltcall", "ping", "I@nginx:server"]).unwrap();
        match cli.action {
            Action::Ping { target } => {
                assert_eq!(Target::compound("I@nginx:server"), target.target());
            }
            other => panic!("expected ping but got:\n{other:#?}"),
        }
    }

    #[test]
    fn cmd_takes_words_after_double_dash() {
        let cli =
            Cli::try_parse_from(["saltcall", "cmd", "ctl*", "--batch", "2", "--", "df", "-h"])
                .unwrap();
        match cli.action {
            Action::Cmd { words, batch, .. } => {
                assert_eq!(vec!["df", "-h"], words);
                assert_eq!(Some("2".to_string()), batch);
            }
            other => panic!("expected cmd but got:\n{other:#?}"),
        }
    }
}
