//! Gitee Framework - Building Blocks for Gitee Robots
//!
//! Everything a robot binary needs around its business logic: option groups,
//! a secret agent for the access token, a hot-reloading config agent, the
//! webhook run-loop and a REST client.
//!
//! A robot implements [`Handler`] and hands it to [`server::run`]; events are
//! decoded from the `X-Gitee-Event` header and dispatched one task each.
//!
//! # Usage
//!
//! ```rust,ignore
//! let secrets = SecretAgent::start(&opts.gitee.secret_paths()).await?;
//! let mut config = ConfigAgent::new::<Configuration>();
//! config.start(opts.service.config_path()?).await?;
//!
//! let client = RestClient::new(&opts.gitee.gitee_endpoint, secrets.token_generator(&opts.gitee.token_path)?)?;
//! let robot = Robot::new(Arc::new(client), Arc::new(config.provider()));
//! server::run(robot, run_options).await?;
//! ```

pub mod client;
pub mod config;
pub mod event;
pub mod filter;
pub mod handler;
pub mod logging;
pub mod options;
pub mod secret;
pub mod server;

pub use client::{ClientError, GiteeClient, RestClient};
pub use config::{AgentConfigProvider, Config, ConfigAgent, ConfigError, ConfigProvider};
pub use event::{Event, EventKind, IssueEvent, NoteEvent, PullRequestEvent, PushEvent};
pub use filter::{HasRepoFilter, RepoFilter};
pub use handler::Handler;
pub use options::{GiteeOptions, LogFormat, OptionsError, ServiceOptions};
pub use secret::{SecretAgent, SecretError, TokenGenerator};
pub use server::{RunOptions, ServerError};

// Re-exported so robots can implement `Handler` without a direct dependency.
pub use async_trait::async_trait;
