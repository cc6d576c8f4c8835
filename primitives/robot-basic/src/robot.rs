use std::sync::Arc;

use gitee_framework::{
    ConfigProvider, GiteeClient, Handler, IssueEvent, NoteEvent, PullRequestEvent, PushEvent,
    async_trait,
};
use tracing::Span;

use crate::config::Configuration;

pub const BOT_NAME: &str = "robot-basic";

/// Platform capabilities the handlers rely on. Empty while every handler is
/// a no-op; add the `GiteeClient` calls a handler starts making here.
pub trait Client: Send + Sync {}

impl<T: GiteeClient> Client for T {}

/// Receives webhook events and routes them to per-kind handlers.
pub struct Robot<C> {
    _cli: Arc<C>,
    get_config: Arc<dyn ConfigProvider<Configuration>>,
}

impl<C: Client> Robot<C> {
    pub fn new(cli: Arc<C>, get_config: Arc<dyn ConfigProvider<Configuration>>) -> Self {
        Self {
            _cli: cli,
            get_config,
        }
    }

    /// Resolves the config item for the event's repository. Events without a
    /// repository, or for repositories no item covers, are skipped.
    fn check_repo(
        &self,
        kind: &'static str,
        org_repo: Option<(&str, &str)>,
        log: &Span,
    ) -> anyhow::Result<()> {
        let Some((org, repo)) = org_repo else {
            tracing::debug!(parent: log, kind, "event has no repository, skipping");
            return Ok(());
        };

        let config = self.get_config.current()?;
        if config.config_for(org, repo).is_none() {
            tracing::debug!(parent: log, kind, org, repo, "repository not configured, skipping");
            return Ok(());
        }

        tracing::debug!(parent: log, kind, org, repo, "event received");
        Ok(())
    }
}

#[async_trait]
impl<C: Client + 'static> Handler for Robot<C> {
    async fn handle_pr_event(&self, e: &PullRequestEvent, log: &Span) -> anyhow::Result<()> {
        self.check_repo("pull_request", e.org_repo(), log)
    }

    async fn handle_issue_event(&self, e: &IssueEvent, log: &Span) -> anyhow::Result<()> {
        self.check_repo("issue", e.org_repo(), log)
    }

    async fn handle_push_event(&self, e: &PushEvent, log: &Span) -> anyhow::Result<()> {
        self.check_repo("push", e.org_repo(), log)
    }

    async fn handle_note_event(&self, e: &NoteEvent, log: &Span) -> anyhow::Result<()> {
        self.check_repo("note", e.org_repo(), log)
    }
}
