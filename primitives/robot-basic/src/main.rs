//! Robot Basic - Template Gitee Robot
//!
//! Starting point for a Gitee robot. Loads the access token and the robot
//! config, then serves webhooks and routes pull-request, issue, push and note
//! events to the handlers in `robot.rs`.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: port 8888, token at /etc/gitee/oauth
//! robot-basic --config-file /etc/robot/config.yaml
//!
//! # Custom port, token and endpoint
//! robot-basic --port 8080 --token-path /run/secrets/gitee \
//!     --gitee-endpoint https://gitee.example.com/api/v5 --config-file config.yaml
//! ```
//!
//! # Startup
//!
//! Invalid options or an unreadable token abort the process before any
//! socket is opened. A config file that fails to load is logged and the
//! process exits after releasing the secret agent.

mod config;
mod robot;

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use gitee_framework::{
    ConfigAgent, GiteeOptions, OptionsError, RestClient, RunOptions, SecretAgent, ServiceOptions,
    logging, server,
};
use tracing::Instrument;

use config::Configuration;
use robot::{BOT_NAME, Robot};

/// Template Gitee robot.
#[derive(Parser, Debug, Clone)]
#[command(name = "robot-basic")]
#[command(about = "Handles Gitee webhook events")]
struct Options {
    #[command(flatten)]
    service: ServiceOptions,

    #[command(flatten)]
    gitee: GiteeOptions,
}

impl Options {
    fn validate(&self) -> Result<(), OptionsError> {
        self.service.validate()?;
        self.gitee.validate()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let o = Options::parse();
    let root = logging::init(BOT_NAME, o.service.log_format);

    start(o).instrument(root).await
}

async fn start(o: Options) -> ExitCode {
    if let Err(e) = o.validate() {
        tracing::error!(error = %e, "invalid options");
        return ExitCode::FAILURE;
    }

    let secret_agent = match SecretAgent::start(&o.gitee.secret_paths()).await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!(error = %e, "error starting secret agent");
            return ExitCode::FAILURE;
        }
    };

    let config_file = match o.service.config_path() {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(error = %e, "invalid options");
            return ExitCode::FAILURE;
        }
    };

    let mut config_agent = ConfigAgent::new::<Configuration>();
    if let Err(e) = config_agent.start(config_file).await {
        tracing::error!(error = %e, config_file = %config_file.display(), "start config");
        return ExitCode::SUCCESS;
    }

    let token = match secret_agent.token_generator(&o.gitee.token_path) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "no token loaded");
            return ExitCode::FAILURE;
        }
    };

    let webhook_secret = match o.gitee.webhook_secret_path.as_ref() {
        Some(path) => match secret_agent.token_generator(path) {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::error!(error = %e, "no webhook secret loaded");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let client = match RestClient::new(&o.gitee.gitee_endpoint, token) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build gitee client");
            return ExitCode::FAILURE;
        }
    };

    let robot = Robot::new(
        Arc::new(client),
        Arc::new(config_agent.provider::<Configuration>()),
    );

    let run_options = RunOptions {
        port: o.service.port,
        grace_period: o.service.grace_period(),
        webhook_secret,
    };

    if let Err(e) = server::run(robot, run_options).await {
        tracing::error!(error = %e, "run server failed");
    }

    // Release in reverse start order.
    drop(config_agent);
    drop(secret_agent);

    ExitCode::SUCCESS
}
