//! Pipeline steps for driving SaltStack through its REST API.
//!
//! # Program flow
//!
//! 1. Load a [Config] and look up the API user's [Credentials] in a [CredentialStore].
//!
//! 2. Create a [Master] with an [HttpInterface]. The default `http` feature provides
//!    [http::ReqwestClient].
//!
//! 3. Send [Command]s with [Master::run], or use the ready-made [steps]. The [Master] logs in on
//!    first use and attaches its auth token to every request.
//!
//! 4. Decide whether it worked with [SaltResponse::check], and print it with a [report::Report].
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use saltcall::core::Target;
//! use saltcall::report::{Report, Reporter};
//! use saltcall::steps::{self, StateOptions};
//! use saltcall::{Credentials, Master};
//!
//! let config = saltcall::Config::new("https://cfg01:6969");
//! let http = saltcall::http::ReqwestClient::from_config(&config)?;
//! let credentials = Credentials::new("jenkins", "hunter2");
//! let mut master = Master::new(&config.url, credentials, &config.eauth, http);
//!
//! let target = Target::compound("I@nginx:server");
//! let options = StateOptions::default();
//! let response = steps::enforce_state(&mut master, &target, &["nginx"], &options).await?;
//! Reporter.state_result(&response, true)?;
//! # Ok(())
//! # }
//! ```
//!
//! [Credentials]: credentials::Credentials
//! [CredentialStore]: credentials::CredentialStore
//! [HttpInterface]: http::HttpInterface
//! [Command]: core::Command

pub mod config;
pub mod core;
pub mod credentials;
pub mod error;
pub mod http;
pub mod master;
pub mod report;
pub mod response;
pub mod steps;

#[doc(inline)]
pub use config::Config;

#[doc(inline)]
pub use credentials::Credentials;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use master::Master;

#[doc(inline)]
pub use response::SaltResponse;
