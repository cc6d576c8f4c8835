//! Gitee webhook payloads.
//!
//! Only the fields robots route on are modelled; everything is optional so a
//! partial payload still decodes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

/// The webhook kinds robots can handle, keyed by the `X-Gitee-Event` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PullRequest,
    Issue,
    Push,
    Note,
}

impl EventKind {
    pub fn header_value(self) -> &'static str {
        match self {
            Self::PullRequest => "Merge Request Hook",
            Self::Issue => "Issue Hook",
            Self::Push => "Push Hook",
            Self::Note => "Note Hook",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}

/// An `X-Gitee-Event` value no robot handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported event type '{0}'")]
pub struct UnsupportedEvent(pub String);

impl FromStr for EventKind {
    type Err = UnsupportedEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Merge Request Hook" => Ok(Self::PullRequest),
            "Issue Hook" => Ok(Self::Issue),
            "Push Hook" => Ok(Self::Push),
            "Note Hook" => Ok(Self::Note),
            other => Err(UnsupportedEvent(other.to_string())),
        }
    }
}

/// Gitee sends `null` for empty lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    /// Repository slug, the `repo` half of `org/repo`.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Owning org or user, the `org` half of `org/repo`.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub owner: Option<User>,
}

impl Repository {
    pub fn org_repo(&self) -> Option<(&str, &str)> {
        match (self.namespace.as_deref(), self.path.as_deref()) {
            (Some(org), Some(repo)) if !org.is_empty() && !repo.is_empty() => Some((org, repo)),
            _ => self
                .full_name
                .as_deref()
                .and_then(|n| n.split_once('/'))
                .filter(|(org, repo)| !org.is_empty() && !repo.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub number: Option<i64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub head: Option<Branch>,
    #[serde(default)]
    pub base: Option<Branch>,
    #[serde(default)]
    pub merged: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: Option<i64>,
    /// Gitee issue numbers are strings such as `I4ABCD`.
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub added: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub removed: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub modified: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequestEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub action_desc: Option<String>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub sender: Option<User>,
}

impl PullRequestEvent {
    pub fn org_repo(&self) -> Option<(&str, &str)> {
        self.repository.as_ref()?.org_repo()
    }

    pub fn number(&self) -> Option<i64> {
        self.pull_request.as_ref()?.number
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub issue: Option<Issue>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub sender: Option<User>,
}

impl IssueEvent {
    pub fn org_repo(&self) -> Option<(&str, &str)> {
        self.repository.as_ref()?.org_repo()
    }

    pub fn number(&self) -> Option<&str> {
        self.issue.as_ref()?.number.as_deref()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(default, rename = "ref")]
    pub ref_name: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub created: Option<bool>,
    #[serde(default)]
    pub deleted: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub head_commit: Option<Commit>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub pusher: Option<User>,
    #[serde(default)]
    pub sender: Option<User>,
}

impl PushEvent {
    pub fn org_repo(&self) -> Option<(&str, &str)> {
        self.repository.as_ref()?.org_repo()
    }

    /// The pushed branch, if the ref is a branch.
    pub fn branch(&self) -> Option<&str> {
        self.ref_name.as_deref()?.strip_prefix("refs/heads/")
    }
}

/// What a note (comment) was left on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteTarget {
    PullRequest,
    Issue,
    Commit,
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub comment: Option<Comment>,
    #[serde(default)]
    pub noteable_type: Option<String>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
    #[serde(default)]
    pub issue: Option<Issue>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub sender: Option<User>,
}

impl NoteEvent {
    pub fn org_repo(&self) -> Option<(&str, &str)> {
        self.repository.as_ref()?.org_repo()
    }

    pub fn target(&self) -> NoteTarget {
        match self.noteable_type.as_deref() {
            Some("PullRequest") => NoteTarget::PullRequest,
            Some("Issue") => NoteTarget::Issue,
            Some("Commit") => NoteTarget::Commit,
            _ => NoteTarget::Other,
        }
    }

    pub fn body(&self) -> Option<&str> {
        self.comment.as_ref()?.body.as_deref()
    }
}

/// A decoded webhook of one of the supported kinds.
#[derive(Debug, Clone)]
pub enum Event {
    PullRequest(PullRequestEvent),
    Issue(IssueEvent),
    Push(PushEvent),
    Note(NoteEvent),
}

impl Event {
    pub fn decode(kind: EventKind, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::PullRequest => Self::PullRequest(serde_json::from_slice(payload)?),
            EventKind::Issue => Self::Issue(serde_json::from_slice(payload)?),
            EventKind::Push => Self::Push(serde_json::from_slice(payload)?),
            EventKind::Note => Self::Note(serde_json::from_slice(payload)?),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::PullRequest(_) => EventKind::PullRequest,
            Self::Issue(_) => EventKind::Issue,
            Self::Push(_) => EventKind::Push,
            Self::Note(_) => EventKind::Note,
        }
    }

    pub fn org_repo(&self) -> Option<(&str, &str)> {
        match self {
            Self::PullRequest(e) => e.org_repo(),
            Self::Issue(e) => e.org_repo(),
            Self::Push(e) => e.org_repo(),
            Self::Note(e) => e.org_repo(),
        }
    }
}
