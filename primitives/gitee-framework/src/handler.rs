//! The trait a robot implements to receive webhook events.

use async_trait::async_trait;
use tracing::Span;

use crate::event::{Event, IssueEvent, NoteEvent, PullRequestEvent, PushEvent};

/// Per-kind webhook callbacks.
///
/// Every method defaults to doing nothing, so a robot overrides only the
/// kinds it cares about. `log` is the span the run-loop opened for the
/// delivery; it already carries the event type and id. Errors are logged by
/// the run-loop and never stop the server.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle_pr_event(&self, _event: &PullRequestEvent, _log: &Span) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_issue_event(&self, _event: &IssueEvent, _log: &Span) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_push_event(&self, _event: &PushEvent, _log: &Span) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_note_event(&self, _event: &NoteEvent, _log: &Span) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Routes a decoded event to the matching [`Handler`] method.
pub async fn dispatch<H: Handler + ?Sized>(
    handler: &H,
    event: &Event,
    log: &Span,
) -> anyhow::Result<()> {
    match event {
        Event::PullRequest(e) => handler.handle_pr_event(e, log).await,
        Event::Issue(e) => handler.handle_issue_event(e, log).await,
        Event::Push(e) => handler.handle_push_event(e, log).await,
        Event::Note(e) => handler.handle_note_event(e, log).await,
    }
}
